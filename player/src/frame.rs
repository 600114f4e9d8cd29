//! Encoded chunks and decoded frames
//!
//! A [`DecodedFrame`] owns its pixel data and is released exactly once:
//! either explicitly through [`DecodedFrame::close`] after it is drawn, or
//! implicitly when it is dropped unplayed (teardown, abort).

use std::fmt;
use std::time::Duration;

/// Whether a chunk can be decoded on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Key,
    Delta,
}

/// A unit of encoded media data
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub timestamp: i64,
    pub chunk_type: ChunkType,
}

impl EncodedChunk {
    pub fn new(data: Vec<u8>, timestamp: i64, chunk_type: ChunkType) -> Self {
        Self {
            data,
            timestamp,
            chunk_type,
        }
    }

    pub fn is_key(&self) -> bool {
        self.chunk_type == ChunkType::Key
    }
}

impl fmt::Debug for EncodedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedChunk")
            .field("timestamp", &self.timestamp)
            .field("chunk_type", &self.chunk_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Called once with the frame timestamp when a frame is released
pub type ReleaseHook = Box<dyn FnOnce(i64) + Send + 'static>;

/// A decoded BGRA8 frame
pub struct DecodedFrame {
    data: Vec<u8>,
    timestamp: i64,
    width: u32,
    height: u32,
    on_release: Option<ReleaseHook>,
}

impl DecodedFrame {
    /// Create a frame from packed BGRA8 pixels (`width * height * 4` bytes)
    pub fn new(data: Vec<u8>, timestamp: i64, width: u32, height: u32) -> Self {
        Self {
            data,
            timestamp,
            width,
            height,
            on_release: None,
        }
    }

    /// Attach a hook that runs when the frame's resources are released
    pub fn with_release_hook(mut self, hook: impl FnOnce(i64) + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// Presentation timestamp in microseconds
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Presentation timestamp as an offset from media time zero.
    /// Negative timestamps map to zero.
    pub fn media_time(&self) -> Duration {
        Duration::from_micros(u64::try_from(self.timestamp).unwrap_or(0))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Packed BGRA8 pixel data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Release the frame's resources
    pub fn close(self) {
        drop(self);
    }

    fn release(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook(self.timestamp);
        }
        self.data = Vec::new();
    }
}

impl Drop for DecodedFrame {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("timestamp", &self.timestamp)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}
