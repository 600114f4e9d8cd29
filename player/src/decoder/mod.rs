//! Decode stage
//!
//! A [`Decoder`] accepts encoded chunks in admission order and delivers
//! decoded frames asynchronously through a [`FrameSink`], possibly from a
//! decoder-owned thread. The sink is the only path into the frame buffer.

#[cfg(feature = "video")]
pub mod gst;
mod raw;

pub use raw::RawDecoder;

use common::{DecoderConfig, StatusCategory};
use std::sync::{Arc, PoisonError};
use tokio::time::Instant;

use crate::error::{PlayoutError, Result};
use crate::frame::{DecodedFrame, EncodedChunk};
use crate::frame_buffer::FrameBuffer;
use crate::scheduler::SharedPlayoutState;
use crate::stats::PlaybackStats;
use crate::status::StatusReporter;

/// Codec string of chunks that already carry packed BGRA8 pixels
pub const RAW_CODEC: &str = "raw";

pub trait Decoder: Send {
    /// Prepare for a stream. Unsupported configurations are fatal.
    fn configure(&mut self, config: &DecoderConfig) -> Result<()>;

    /// Submit one chunk. Frames arrive later through the sink.
    fn decode(&mut self, chunk: EncodedChunk) -> Result<()>;

    /// Drain pending output, then signal end of stream on the sink
    fn flush(&mut self) -> Result<()>;
}

/// Output path from a decoder into the session
#[derive(Clone)]
pub struct FrameSink {
    buffer: Arc<FrameBuffer>,
    state: SharedPlayoutState,
    status: StatusReporter,
    stats: Arc<PlaybackStats>,
}

impl FrameSink {
    pub fn new(
        buffer: Arc<FrameBuffer>,
        state: SharedPlayoutState,
        status: StatusReporter,
        stats: Arc<PlaybackStats>,
    ) -> Self {
        Self {
            buffer,
            state,
            status,
            stats,
        }
    }

    /// Deliver a decoded frame
    pub fn output(&self, frame: DecodedFrame) {
        self.stats.record_decoded();

        let fps = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_decoded_frame(Instant::now());
        if let Some(fps) = fps {
            self.stats.set_decode_fps(fps);
            self.status
                .set_status(StatusCategory::Render, format!("{:.0} fps", fps));
        }

        let timestamp = frame.timestamp();
        if self.buffer.push(frame) {
            log::trace!("Frame {}us ended underflow", timestamp);
        }
    }

    /// Report a decode failure. Playback continues.
    pub fn error(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::warn!("Decode error: {}", reason);
        self.stats.record_decode_error();
        self.status.set_status(StatusCategory::Decode, reason);
    }

    /// No more frames will be delivered
    pub fn end_of_stream(&self) {
        log::debug!("Decoder reached end of stream");
        self.buffer.finish_input();
    }
}

/// Pick the decoder implementation for a codec
pub fn create_decoder(config: &DecoderConfig, sink: FrameSink) -> Result<Box<dyn Decoder>> {
    if config.codec == RAW_CODEC {
        return Ok(Box::new(RawDecoder::new(sink)));
    }

    #[cfg(feature = "video")]
    {
        Ok(Box::new(gst::GstDecoder::new(sink)))
    }

    #[cfg(not(feature = "video"))]
    {
        drop(sink);
        Err(PlayoutError::Configuration(format!(
            "Codec '{}' needs the GStreamer decoder (build with --features video)",
            config.codec
        )))
    }
}

/// Reject configurations without a usable coded size
fn check_coded_size(config: &DecoderConfig) -> Result<()> {
    if config.coded_width == 0 || config.coded_height == 0 {
        return Err(PlayoutError::Configuration(format!(
            "Invalid coded size for {}",
            config
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_buffer::NextFrame;
    use crate::scheduler::PlayoutState;
    use std::sync::Mutex;

    fn sink() -> (FrameSink, Arc<FrameBuffer>, StatusReporter, Arc<PlaybackStats>) {
        let buffer = Arc::new(FrameBuffer::new());
        let status = StatusReporter::new();
        let stats = Arc::new(PlaybackStats::new());
        let sink = FrameSink::new(
            buffer.clone(),
            Arc::new(Mutex::new(PlayoutState::new())),
            status.clone(),
            stats.clone(),
        );
        (sink, buffer, status, stats)
    }

    #[test]
    fn test_output_reaches_buffer() {
        let (sink, buffer, _, stats) = sink();
        sink.output(DecodedFrame::new(vec![0; 4], 0, 1, 1));

        assert_eq!(buffer.len(), 1);
        assert!(!buffer.is_underflowed());
        assert_eq!(stats.snapshot().frames_decoded, 1);
    }

    #[test]
    fn test_error_reports_decode_status() {
        let (sink, _, status, stats) = sink();
        sink.error("truncated payload");

        assert_eq!(stats.snapshot().decode_errors, 1);
        let record = status.take_pending().unwrap();
        assert_eq!(record.get(StatusCategory::Decode), Some("truncated payload"));
    }

    #[test]
    fn test_end_of_stream_finishes_buffer() {
        let (sink, buffer, _, _) = sink();
        sink.end_of_stream();
        assert!(matches!(buffer.next_frame(), NextFrame::Finished));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_rate_status() {
        let (sink, _, status, _) = sink();
        sink.output(DecodedFrame::new(vec![0; 4], 0, 1, 1));
        tokio::time::advance(std::time::Duration::from_millis(50)).await;
        sink.output(DecodedFrame::new(vec![0; 4], 33_000, 1, 1));

        let record = status.take_pending().unwrap();
        assert_eq!(record.get(StatusCategory::Render), Some("20 fps"));
    }

    #[test]
    fn test_raw_codec_selects_raw_decoder() {
        let (sink, _, _, _) = sink();
        let config = DecoderConfig {
            codec: RAW_CODEC.into(),
            coded_width: 2,
            coded_height: 2,
        };
        let mut decoder = create_decoder(&config, sink).unwrap();
        assert!(decoder.configure(&config).is_ok());
    }
}
