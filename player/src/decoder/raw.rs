use common::DecoderConfig;

use super::{Decoder, FrameSink, RAW_CODEC, check_coded_size};
use crate::error::{PlayoutError, Result};
use crate::frame::{DecodedFrame, EncodedChunk};

/// Passthrough decoder for chunks carrying packed BGRA8 pixels.
///
/// Every chunk is independently decodable; frames are delivered
/// synchronously from [`Decoder::decode`].
pub struct RawDecoder {
    sink: FrameSink,
    config: Option<DecoderConfig>,
}

impl RawDecoder {
    pub fn new(sink: FrameSink) -> Self {
        Self { sink, config: None }
    }
}

impl Decoder for RawDecoder {
    fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
        if config.codec != RAW_CODEC {
            return Err(PlayoutError::Configuration(format!(
                "Raw decoder cannot decode '{}'",
                config.codec
            )));
        }
        check_coded_size(config)?;

        log::info!("Raw decoder configured for {}", config);
        self.config = Some(config.clone());
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| PlayoutError::Decode("Decoder not configured".into()))?;

        let expected = config.coded_width as usize * config.coded_height as usize * 4;
        if chunk.data.len() != expected {
            return Err(PlayoutError::Decode(format!(
                "Chunk at {}us has {} bytes, expected {} for {}x{} BGRA",
                chunk.timestamp,
                chunk.data.len(),
                expected,
                config.coded_width,
                config.coded_height
            )));
        }

        let frame = DecodedFrame::new(
            chunk.data,
            chunk.timestamp,
            config.coded_width,
            config.coded_height,
        );
        self.sink.output(frame);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.sink.end_of_stream();
        Ok(())
    }
}
