//! Paced video playout
//!
//! Encoded chunks flow from a [`source`] through the [`chunk_relay`] into
//! the [`admission`] controller, which feeds the [`decoder`] while the
//! [`frame_buffer`] is below its high-water mark. The [`scheduler`] maps
//! each decoded frame's timestamp to a wall-clock deadline and hands it to
//! a [`presenter`] at that moment. A [`session`] wires one such pipeline
//! together and tears it down.

pub mod admission;
pub mod chunk_relay;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod frame_buffer;
pub mod presenter;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod stats;
pub mod status;
pub mod surface;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use error::{PlayoutError, Result};
pub use session::{PlaybackSession, PlayoutSettings, SessionMonitor, SessionOptions};
