//! Synthetic test pattern source
//!
//! Emits `raw` BGRA chunks: a colour gradient with a vertical bar sweeping
//! across the frame, one chunk per frame at `i * 1e6 / fps` microseconds.

use common::{DecoderConfig, StatusCategory};
use rayon::prelude::*;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{Source, SourceOutput};
use crate::decoder::RAW_CODEC;
use crate::error::{PlayoutError, Result};
use crate::frame::{ChunkType, EncodedChunk};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 360;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_FRAMES: u64 = 300;

/// Every this many frames is marked as a key chunk
const KEY_INTERVAL: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPatternSource {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frames: u64,
    /// Emit chunks at the frame rate instead of as fast as possible
    pub paced: bool,
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            frames: DEFAULT_FRAMES,
            paced: true,
        }
    }
}

impl TestPatternSource {
    /// Parse `WIDTHxHEIGHT[@FPS][/FRAMES][?burst]`; empty means defaults
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || PlayoutError::Configuration(format!("Invalid test pattern '{}'", spec));
        let mut source = Self::default();

        let spec = match spec.strip_suffix("?burst") {
            Some(rest) => {
                source.paced = false;
                rest
            }
            None => spec,
        };

        let (rest, frames) = match spec.split_once('/') {
            Some((rest, frames)) => (rest, Some(frames)),
            None => (spec, None),
        };
        let (size, fps) = match rest.split_once('@') {
            Some((size, fps)) => (size, Some(fps)),
            None => (rest, None),
        };

        if !size.is_empty() {
            let (w, h) = size.split_once('x').ok_or_else(invalid)?;
            source.width = w.parse().map_err(|_| invalid())?;
            source.height = h.parse().map_err(|_| invalid())?;
        }
        if let Some(fps) = fps {
            source.fps = fps.parse().map_err(|_| invalid())?;
        }
        if let Some(frames) = frames {
            source.frames = frames.parse().map_err(|_| invalid())?;
        }

        if source.width == 0 || source.height == 0 || source.fps == 0 {
            return Err(invalid());
        }
        Ok(source)
    }

    /// Timestamp of frame `index` in microseconds
    pub fn timestamp(&self, index: u64) -> i64 {
        (index * 1_000_000 / self.fps as u64) as i64
    }

    fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            codec: RAW_CODEC.to_string(),
            coded_width: self.width,
            coded_height: self.height,
        }
    }

    /// Render frame `index` as packed BGRA8
    pub fn render(&self, index: u64) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;
        let bar_width = (width / 16).max(1);
        let bar_x = (index as usize * 8) % width;
        let shade = (index % 256) as u8;

        let mut data = vec![0u8; width * height * 4];
        data.par_chunks_mut(width * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let g = (y * 255 / height.max(1)) as u8;
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let on_bar = x >= bar_x && x < bar_x + bar_width;
                    if on_bar {
                        px.copy_from_slice(&[255, 255, 255, 255]);
                    } else {
                        let b = (x * 255 / width.max(1)) as u8;
                        px.copy_from_slice(&[b, g, shade, 255]);
                    }
                }
            });
        data
    }

    async fn run(self, output: &mut SourceOutput) -> Result<()> {
        output.configure(self.decoder_config())?;
        output.set_status(StatusCategory::Fetch, self.describe());

        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / self.fps as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        for index in 0..self.frames {
            if self.paced {
                ticker.tick().await;
            } else {
                tokio::task::yield_now().await;
            }

            let chunk_type = if index % KEY_INTERVAL == 0 {
                ChunkType::Key
            } else {
                ChunkType::Delta
            };
            output.push(EncodedChunk::new(
                self.render(index),
                self.timestamp(index),
                chunk_type,
            ))?;
        }

        log::info!("Test pattern finished after {} frames", self.frames);
        output.set_status(StatusCategory::Demux, format!("{} chunks produced", self.frames));
        Ok(())
    }
}

impl Source for TestPatternSource {
    fn describe(&self) -> String {
        format!(
            "test pattern {}x{}@{}fps ({} frames)",
            self.width, self.height, self.fps, self.frames
        )
    }

    fn spawn(self: Box<Self>, mut output: SourceOutput) -> JoinHandle<()> {
        let source = *self;
        tokio::spawn(async move {
            match source.run(&mut output).await {
                Ok(()) => {}
                Err(PlayoutError::RelayClosed) => {
                    log::debug!("Relay closed, stopping test pattern");
                }
                Err(e) => output.fail(StatusCategory::Fetch, e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_relay;
    use crate::status::StatusReporter;

    #[test]
    fn test_parse_defaults() {
        assert_eq!(TestPatternSource::parse("").unwrap(), TestPatternSource::default());
    }

    #[test]
    fn test_parse_full() {
        let source = TestPatternSource::parse("320x240@25/10?burst").unwrap();
        assert_eq!((source.width, source.height), (320, 240));
        assert_eq!(source.fps, 25);
        assert_eq!(source.frames, 10);
        assert!(!source.paced);

        let source = TestPatternSource::parse("64x48").unwrap();
        assert_eq!(source.fps, DEFAULT_FPS);
        assert_eq!(source.frames, DEFAULT_FRAMES);
        assert!(source.paced);
    }

    #[test]
    fn test_parse_invalid() {
        for spec in ["640", "axb", "640x360@0", "0x10", "640x360@30/x"] {
            assert!(
                matches!(TestPatternSource::parse(spec), Err(PlayoutError::Configuration(_))),
                "{spec} should be rejected"
            );
        }
    }

    #[test]
    fn test_timestamps() {
        let source = TestPatternSource::parse("2x2@30").unwrap();
        assert_eq!(source.timestamp(0), 0);
        assert_eq!(source.timestamp(1), 33_333);
        assert_eq!(source.timestamp(30), 1_000_000);
    }

    #[test]
    fn test_render_size() {
        let source = TestPatternSource::parse("32x8").unwrap();
        let frame = source.render(3);
        assert_eq!(frame.len(), 32 * 8 * 4);
        assert!(frame.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_configured_chunks() {
        let (writer, mut reader) = chunk_relay::channel();
        let (output, config_rx) = SourceOutput::new(writer, StatusReporter::new());

        let source = Box::new(TestPatternSource::parse("4x2@10/3").unwrap());
        let handle = source.spawn(output);

        let config = config_rx.await.unwrap().unwrap();
        assert_eq!(config.codec, "raw");
        assert_eq!((config.coded_width, config.coded_height), (4, 2));

        let mut chunks = Vec::new();
        while let Some(chunk) = reader.pull().await {
            chunks.push(chunk);
        }
        handle.await.unwrap();

        let timestamps: Vec<_> = chunks.iter().map(|c| c.timestamp).collect();
        assert_eq!(timestamps, vec![0, 100_000, 200_000]);
        assert!(chunks[0].is_key());
        assert!(!chunks[1].is_key());
        assert!(chunks.iter().all(|c| c.data.len() == 4 * 2 * 4));
    }
}
