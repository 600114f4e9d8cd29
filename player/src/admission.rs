//! Decode admission controller
//!
//! Feeds the decoder from the chunk relay at a fixed cadence, one chunk per
//! tick, and only while the frame buffer is below its high-water mark. This
//! bounds decoded-frame memory without any rate matching.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::chunk_relay::ChunkReader;
use crate::decoder::{Decoder, FrameSink};
use crate::frame_buffer::FrameBuffer;
use crate::stats::PlaybackStats;

pub const DEFAULT_HIGH_WATER_MARK: usize = 100;
pub const DEFAULT_ADMISSION_INTERVAL: Duration = Duration::from_millis(10);

pub struct AdmissionController {
    reader: ChunkReader,
    decoder: Box<dyn Decoder>,
    buffer: Arc<FrameBuffer>,
    sink: FrameSink,
    stats: Arc<PlaybackStats>,
    high_water_mark: usize,
    interval: Duration,
}

impl AdmissionController {
    pub fn new(
        reader: ChunkReader,
        decoder: Box<dyn Decoder>,
        buffer: Arc<FrameBuffer>,
        sink: FrameSink,
        stats: Arc<PlaybackStats>,
    ) -> Self {
        Self {
            reader,
            decoder,
            buffer,
            sink,
            stats,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            interval: DEFAULT_ADMISSION_INTERVAL,
        }
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark.max(1);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Admit chunks until the relay reports end of stream, then flush the
    /// decoder and keep it alive until its last frame is delivered
    pub async fn run(mut self) {
        log::debug!(
            "Admission started (every {:?}, high-water mark {})",
            self.interval,
            self.high_water_mark
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.buffer.len() >= self.high_water_mark {
                log::trace!("Frame buffer at high-water mark, skipping admission tick");
                continue;
            }

            let Some(chunk) = self.reader.pull().await else {
                log::info!("Chunk relay drained, flushing decoder");
                break;
            };

            let timestamp = chunk.timestamp;
            match self.decoder.decode(chunk) {
                Ok(()) => self.stats.record_admitted(),
                Err(e) if e.is_fatal() => {
                    log::error!("Decoder failed at chunk {}us: {}", timestamp, e);
                    self.sink.error(e.to_string());
                    self.sink.end_of_stream();
                    return;
                }
                Err(e) => self.sink.error(e.to_string()),
            }
        }

        if let Err(e) = self.decoder.flush() {
            self.sink.error(e.to_string());
            self.sink.end_of_stream();
        }

        while !self.buffer.is_input_finished() {
            ticker.tick().await;
        }
        log::debug!("Admission finished");
    }
}
