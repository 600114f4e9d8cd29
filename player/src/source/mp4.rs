//! MP4/H.264 demuxing source
//!
//! `qtdemux` splits the container and `h264parse` rewrites the stream as
//! Annex B access units, which are pulled from an `appsink` on a blocking
//! thread and pushed into the relay as encoded chunks.

use common::{DecoderConfig, StatusCategory};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::path::PathBuf;
use tokio::task::JoinHandle;

use super::{Source, SourceOutput};
use crate::decoder::gst::initialize_gstreamer;
use crate::error::{PlayoutError, Result};
use crate::frame::{ChunkType, EncodedChunk};

/// Codec string announced for demuxed H.264
const H264_CODEC: &str = "avc1";

pub struct Mp4Source {
    path: PathBuf,
}

impl Mp4Source {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn build_pipeline(&self) -> Result<(gst::Pipeline, gst_app::AppSink)> {
        initialize_gstreamer()?;

        let pipeline_str = format!(
            "filesrc location=\"{}\" ! qtdemux name=demux demux.video_0 ! queue ! h264parse config-interval=-1 ! video/x-h264,stream-format=byte-stream,alignment=au ! appsink name=sink sync=false",
            self.path.display()
        );
        log::debug!("GStreamer demux pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| PlayoutError::Configuration(format!("Failed to create demux pipeline: {}", e)))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| PlayoutError::Configuration("Pipeline is not a gst::Pipeline".into()))?;

        let app_sink = pipeline
            .by_name("sink")
            .ok_or_else(|| PlayoutError::Configuration("Failed to get appsink from pipeline".into()))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| PlayoutError::Configuration("sink is not an AppSink".into()))?;

        Ok((pipeline, app_sink))
    }

    /// Decoder configuration from the negotiated caps of the first sample
    fn config_from_caps(caps: &gst::CapsRef) -> Result<DecoderConfig> {
        let structure = caps
            .structure(0)
            .ok_or_else(|| PlayoutError::Configuration("Demuxed stream has no caps".into()))?;

        let dimension = |field: &str| {
            structure
                .get::<i32>(field)
                .ok()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    PlayoutError::Configuration(format!("Demuxed stream has no {}", field))
                })
        };

        Ok(DecoderConfig {
            codec: H264_CODEC.to_string(),
            coded_width: dimension("width")?,
            coded_height: dimension("height")?,
        })
    }

    fn demux(&self, output: &mut SourceOutput) -> Result<u64> {
        let (pipeline, app_sink) = self.build_pipeline()?;
        let pipeline = PipelineGuard(pipeline);

        pipeline.0.set_state(gst::State::Playing).map_err(|e| {
            PlayoutError::Configuration(format!("Failed to start demux pipeline: {}", e))
        })?;
        output.set_status(StatusCategory::Fetch, format!("reading {}", self.path.display()));

        let mut chunks = 0u64;
        loop {
            let sample = match app_sink.pull_sample() {
                Ok(sample) => sample,
                Err(_) if app_sink.is_eos() => break,
                Err(_) => return Err(pipeline.error()),
            };

            if !output.is_configured() {
                let caps = sample
                    .caps()
                    .ok_or_else(|| PlayoutError::Configuration("Sample without caps".into()))?;
                output.configure(Self::config_from_caps(caps)?)?;
            }

            let buffer = sample
                .buffer()
                .ok_or_else(|| PlayoutError::Decode("Sample without buffer".into()))?;
            let map = buffer
                .map_readable()
                .map_err(|_| PlayoutError::Decode("Failed to map demuxed buffer".into()))?;

            let timestamp = buffer
                .pts()
                .or_else(|| buffer.dts())
                .map_or(0, |ts| ts.useconds() as i64);
            let chunk_type = if buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
                ChunkType::Delta
            } else {
                ChunkType::Key
            };

            output.push(EncodedChunk::new(map.as_slice().to_vec(), timestamp, chunk_type))?;
            chunks += 1;
        }

        if !output.is_configured() {
            return Err(PlayoutError::Configuration(format!(
                "No video stream in {}",
                self.path.display()
            )));
        }
        Ok(chunks)
    }
}

/// Stops the pipeline however demuxing ends
struct PipelineGuard(gst::Pipeline);

impl PipelineGuard {
    /// Error posted on the bus, if any
    fn error(&self) -> PlayoutError {
        let message = self
            .0
            .bus()
            .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]))
            .and_then(|msg| match msg.view() {
                gst::MessageView::Error(err) => Some(err.error().to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "demux pipeline stopped".to_string());
        PlayoutError::Decode(message)
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.set_state(gst::State::Null) {
            log::warn!("Failed to set demux pipeline state to Null: {}", e);
        }
    }
}

impl Source for Mp4Source {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn spawn(self: Box<Self>, mut output: SourceOutput) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || match self.demux(&mut output) {
            Ok(chunks) => {
                log::info!("Demuxed {} chunks from {}", chunks, self.path.display());
                output.set_status(StatusCategory::Demux, format!("{} chunks demuxed", chunks));
            }
            Err(PlayoutError::RelayClosed) => {
                log::debug!("Relay closed, stopping demux of {}", self.path.display());
            }
            Err(e) => output.fail(StatusCategory::Demux, e),
        })
    }
}
