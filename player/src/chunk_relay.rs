//! Ordered hand-off of encoded chunks from the source to the decode stage
//!
//! The writer never blocks, so bursty demuxing runs independently of the
//! fixed-cadence admission ticks that drain the reader.

use tokio::sync::mpsc;

use crate::error::{PlayoutError, Result};
use crate::frame::EncodedChunk;

/// Create a connected writer/reader pair
pub fn channel() -> (ChunkWriter, ChunkReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChunkWriter { tx }, ChunkReader { rx })
}

/// Producer side of the relay
#[derive(Clone)]
pub struct ChunkWriter {
    tx: mpsc::UnboundedSender<EncodedChunk>,
}

impl ChunkWriter {
    /// Enqueue a chunk without blocking
    pub fn push(&self, chunk: EncodedChunk) -> Result<()> {
        self.tx.send(chunk).map_err(|_| PlayoutError::RelayClosed)
    }

    /// Whether the reader has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the relay
pub struct ChunkReader {
    rx: mpsc::UnboundedReceiver<EncodedChunk>,
}

impl ChunkReader {
    /// Next chunk in production order. Suspends until one is available.
    ///
    /// Returns `None` once every writer is dropped and the relay is drained.
    pub async fn pull(&mut self) -> Option<EncodedChunk> {
        self.rx.recv().await
    }

    /// Number of chunks waiting to be pulled
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
