//! Chunk sources
//!
//! A source announces the stream's [`DecoderConfig`] exactly once, then
//! pushes encoded chunks into the relay in production order. Returning
//! (dropping the [`SourceOutput`]) closes the relay.

#[cfg(feature = "video")]
mod mp4;
mod test_pattern;

#[cfg(feature = "video")]
pub use mp4::Mp4Source;
pub use test_pattern::TestPatternSource;

use common::{DecoderConfig, StatusCategory};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::chunk_relay::ChunkWriter;
use crate::error::{PlayoutError, Result};
use crate::frame::EncodedChunk;
use crate::status::StatusReporter;

/// Location prefix of the synthetic test pattern source
pub const TEST_PATTERN_SCHEME: &str = "test://";

pub trait Source: Send {
    /// Human-readable description for logs and status
    fn describe(&self) -> String;

    /// Start producing into `output`. The task ends at end of input.
    fn spawn(self: Box<Self>, output: SourceOutput) -> JoinHandle<()>;
}

/// Receives the decoder configuration announced by a source, or the
/// error that kept it from producing one
pub type ConfigReceiver = oneshot::Receiver<Result<DecoderConfig>>;

/// Everything a running source writes to
pub struct SourceOutput {
    config_tx: Option<oneshot::Sender<Result<DecoderConfig>>>,
    writer: ChunkWriter,
    status: StatusReporter,
}

impl SourceOutput {
    pub fn new(writer: ChunkWriter, status: StatusReporter) -> (Self, ConfigReceiver) {
        let (config_tx, config_rx) = oneshot::channel();
        let output = Self {
            config_tx: Some(config_tx),
            writer,
            status,
        };
        (output, config_rx)
    }

    /// Announce the stream configuration. Allowed once, before any chunk.
    pub fn configure(&mut self, config: DecoderConfig) -> Result<()> {
        let tx = self.config_tx.take().ok_or_else(|| {
            PlayoutError::Configuration("Decoder configuration announced twice".into())
        })?;

        log::info!("Source configured decoder: {}", config);
        tx.send(Ok(config)).map_err(|_| PlayoutError::RelayClosed)
    }

    pub fn is_configured(&self) -> bool {
        self.config_tx.is_none()
    }

    /// Hand a chunk to the relay
    pub fn push(&self, chunk: EncodedChunk) -> Result<()> {
        if !self.is_configured() {
            return Err(PlayoutError::Configuration(
                "Chunk produced before decoder configuration".into(),
            ));
        }
        self.writer.push(chunk)
    }

    /// Whether the consumer side has gone away (session torn down)
    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }

    pub fn set_status(&self, category: StatusCategory, message: impl Into<String>) {
        self.status.set_status(category, message);
    }

    /// End the source with an error. Before configuration this fails the
    /// session start; afterwards it is reported under `category`.
    pub fn fail(mut self, category: StatusCategory, err: PlayoutError) {
        log::error!("Source failed: {}", err);
        self.status.set_status(category, err.to_string());

        if let Some(tx) = self.config_tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}

/// Build the source for a location: `test://...` or a media file path
pub fn create_source(location: &str) -> Result<Box<dyn Source>> {
    if let Some(spec) = location.strip_prefix(TEST_PATTERN_SCHEME) {
        return Ok(Box::new(TestPatternSource::parse(spec)?));
    }

    let path = std::path::PathBuf::from(shellexpand::tilde(location).as_ref());
    if !path.exists() {
        return Err(PlayoutError::Configuration(format!(
            "Source not found: {}",
            path.display()
        )));
    }

    #[cfg(feature = "video")]
    {
        Ok(Box::new(Mp4Source::new(path)))
    }

    #[cfg(not(feature = "video"))]
    {
        Err(PlayoutError::Configuration(format!(
            "Cannot demux {} (build with --features video)",
            path.display()
        )))
    }
}
