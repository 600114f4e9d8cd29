//! GStreamer-backed decoder
//!
//! Chunks are pushed into an `appsrc` with their timestamps; `decodebin`
//! picks a (hardware, when available) decoder and `videoconvert` produces
//! packed BGRA which the `appsink` callback hands to the frame sink from the
//! GStreamer streaming thread.

use common::DecoderConfig;
use futures::StreamExt;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::sync::OnceLock;
use tokio::task::JoinHandle;

use super::{Decoder, FrameSink, check_coded_size};
use crate::error::{PlayoutError, Result};
use crate::frame::{DecodedFrame, EncodedChunk};

/// Initialize GStreamer once per process
pub fn initialize_gstreamer() -> Result<()> {
    static GSTREAMER_INITIALIZED: OnceLock<std::result::Result<(), String>> = OnceLock::new();

    GSTREAMER_INITIALIZED
        .get_or_init(|| {
            gst::init().map_err(|e| e.to_string())?;
            log::info!("GStreamer initialized");
            Ok(())
        })
        .clone()
        .map_err(|e| PlayoutError::Configuration(format!("Failed to initialize GStreamer: {}", e)))
}

/// Input caps and parser element for a codec string such as `avc1.64001f`
fn codec_elements(codec: &str) -> Option<(&'static str, Option<&'static str>)> {
    let family = codec.split('.').next().unwrap_or(codec);

    match family {
        "avc1" | "avc3" | "h264" => Some((
            "video/x-h264,stream-format=byte-stream,alignment=au",
            Some("h264parse"),
        )),
        "hvc1" | "hev1" | "h265" => Some((
            "video/x-h265,stream-format=byte-stream,alignment=au",
            Some("h265parse"),
        )),
        "vp8" => Some(("video/x-vp8", None)),
        "vp09" | "vp9" => Some(("video/x-vp9", None)),
        "av01" | "av1" => Some((
            "video/x-av1,stream-format=obu-stream,alignment=tu",
            Some("av1parse"),
        )),
        _ => None,
    }
}

/// Copy a possibly row-padded BGRA plane into a packed buffer
fn pack_rows(data: &[u8], width: u32, height: u32, stride: usize) -> Option<Vec<u8>> {
    let row_bytes = width as usize * 4;
    let height = height as usize;
    if row_bytes == 0 || height == 0 {
        return None;
    }

    if stride == row_bytes {
        return data.get(..row_bytes * height).map(<[u8]>::to_vec);
    }
    if stride < row_bytes || data.len() < stride * (height - 1) + row_bytes {
        return None;
    }

    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in data.chunks(stride).take(height) {
        packed.extend_from_slice(&row[..row_bytes]);
    }
    Some(packed)
}

struct ActivePipeline {
    pipeline: gst::Pipeline,
    app_src: gst_app::AppSrc,
    app_sink: gst_app::AppSink,
    bus_watch: JoinHandle<()>,
}

pub struct GstDecoder {
    sink: FrameSink,
    active: Option<ActivePipeline>,
}

impl GstDecoder {
    pub fn new(sink: FrameSink) -> Self {
        Self { sink, active: None }
    }

    fn build_pipeline(&self, config: &DecoderConfig) -> Result<ActivePipeline> {
        let (caps, parser) = codec_elements(&config.codec).ok_or_else(|| {
            PlayoutError::Configuration(format!("Unsupported codec '{}'", config.codec))
        })?;

        let parse_stage = parser.map(|p| format!("{} ! ", p)).unwrap_or_default();
        let pipeline_str = format!(
            "appsrc name=src format=time ! {}decodebin ! videoconvert ! video/x-raw,format=BGRA ! appsink name=sink sync=false",
            parse_stage
        );
        log::debug!("GStreamer decode pipeline: {}", pipeline_str);

        let configuration = |what: &str| PlayoutError::Configuration(what.to_string());

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| PlayoutError::Configuration(format!("Failed to create decode pipeline: {}", e)))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| configuration("Pipeline is not a gst::Pipeline"))?;

        let app_src = pipeline
            .by_name("src")
            .ok_or_else(|| configuration("Failed to get appsrc from pipeline"))?
            .dynamic_cast::<gst_app::AppSrc>()
            .map_err(|_| configuration("src is not an AppSrc"))?;

        let caps = caps
            .parse::<gst::Caps>()
            .map_err(|e| PlayoutError::Configuration(format!("Invalid caps {}: {}", caps, e)))?;
        app_src.set_caps(Some(&caps));

        let app_sink = pipeline
            .by_name("sink")
            .ok_or_else(|| configuration("Failed to get appsink from pipeline"))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| configuration("sink is not an AppSink"))?;

        let frame_sink = self.sink.clone();
        app_sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let caps = sample.caps().ok_or(gst::FlowError::Error)?;
                    let info =
                        gst_video::VideoInfo::from_caps(caps).map_err(|_| gst::FlowError::Error)?;

                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let stride = info.stride().first().copied().unwrap_or(0).max(0) as usize;
                    let Some(data) = pack_rows(map.as_slice(), info.width(), info.height(), stride)
                    else {
                        frame_sink.error(format!(
                            "Decoded buffer too small for {}x{}",
                            info.width(),
                            info.height()
                        ));
                        return Ok(gst::FlowSuccess::Ok);
                    };

                    let timestamp = buffer.pts().map_or(0, |pts| pts.useconds() as i64);
                    frame_sink.output(DecodedFrame::new(
                        data,
                        timestamp,
                        info.width(),
                        info.height(),
                    ));
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let bus = pipeline
            .bus()
            .ok_or_else(|| configuration("Pipeline has no bus"))?;
        let bus_sink = self.sink.clone();
        let bus_watch = tokio::spawn(async move {
            let mut messages = bus.stream();
            while let Some(msg) = messages.next().await {
                match msg.view() {
                    gst::MessageView::Eos(_) => {
                        bus_sink.end_of_stream();
                        break;
                    }
                    gst::MessageView::Error(err) => {
                        log::error!(
                            "GStreamer error: {} (debug: {:?})",
                            err.error(),
                            err.debug()
                        );
                        // The pipeline halts on error; no further frames follow
                        bus_sink.error(err.error().to_string());
                        bus_sink.end_of_stream();
                        break;
                    }
                    gst::MessageView::Warning(warning) => {
                        log::warn!("GStreamer warning: {}", warning.error());
                    }
                    _ => {}
                }
            }
        });

        Ok(ActivePipeline {
            pipeline,
            app_src,
            app_sink,
            bus_watch,
        })
    }
}

impl Decoder for GstDecoder {
    fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
        check_coded_size(config)?;
        initialize_gstreamer()?;

        let active = self.build_pipeline(config)?;
        active.pipeline.set_state(gst::State::Playing).map_err(|e| {
            PlayoutError::Configuration(format!("Failed to start decode pipeline: {}", e))
        })?;

        log::info!("GStreamer decoder configured for {}", config);
        self.active = Some(active);
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| PlayoutError::Decode("Decoder not configured".into()))?;

        let timestamp = chunk.timestamp;
        let is_key = chunk.is_key();
        let mut buffer = gst::Buffer::from_mut_slice(chunk.data);
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| PlayoutError::Decode("Chunk buffer not writable".into()))?;
            buffer.set_pts(gst::ClockTime::from_useconds(timestamp.max(0) as u64));
            if !is_key {
                buffer.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }

        active.app_src.push_buffer(buffer).map_err(|e| {
            PlayoutError::Decode(format!("Chunk at {}us rejected: {:?}", timestamp, e))
        })?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        match self.active {
            Some(ref active) => {
                active.app_src.end_of_stream().map_err(|e| {
                    PlayoutError::Decode(format!("Failed to signal end of stream: {:?}", e))
                })?;
            }
            None => self.sink.end_of_stream(),
        }
        Ok(())
    }
}

impl Drop for GstDecoder {
    fn drop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        // Clear callbacks first to prevent new frames
        active
            .app_sink
            .set_callbacks(gst_app::AppSinkCallbacks::builder().build());
        active.bus_watch.abort();

        if let Err(e) = active.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to set decode pipeline state to Null: {}", e);
        }

        if let Some(bus) = active.pipeline.bus() {
            let mut drained = 0;
            while bus.pop().is_some() {
                drained += 1;
            }
            if drained > 0 {
                log::debug!("Drained {} pending messages from bus", drained);
            }
        }

        log::debug!("GStreamer decoder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_mapping() {
        assert!(codec_elements("avc1.64001f").is_some_and(|(_, p)| p == Some("h264parse")));
        assert!(codec_elements("hev1.1.6.L93.B0").is_some());
        assert!(codec_elements("vp09.00.10.08").is_some_and(|(caps, _)| caps == "video/x-vp9"));
        assert!(codec_elements("av01.0.04M.08").is_some());
        assert!(codec_elements("mp4a.40.2").is_none());
        assert!(codec_elements("theora").is_none());
    }

    #[test]
    fn test_pack_rows_strips_padding() {
        // 1x2 image, 8-byte stride
        let data = [1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8];
        assert_eq!(pack_rows(&data, 1, 2, 8), Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
    }

    #[test]
    fn test_pack_rows_packed_and_short() {
        let data = [9u8; 16];
        assert_eq!(pack_rows(&data, 2, 2, 8), Some(vec![9u8; 16]));
        assert_eq!(pack_rows(&data[..12], 2, 2, 8), None);
        assert_eq!(pack_rows(&data, 2, 2, 4), None);
    }
}
