use thiserror::Error;

/// Errors produced by the playout pipeline
#[derive(Error, Debug)]
pub enum PlayoutError {
    /// The decoder rejected a chunk. Playback continues with the next one.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Unsupported codec, backend or source. Fatal to the session.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A presenter failed to paint a frame. Playback continues.
    #[error("Render error: {0}")]
    Render(String),

    #[error("Chunk relay closed")]
    RelayClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlayoutError {
    /// Whether the error ends the session
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Io(_))
    }
}

pub type Result<T, E = PlayoutError> = std::result::Result<T, E>;
