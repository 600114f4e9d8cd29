//! Common types and utilities for Playout.
//!
//! This crate defines the shared data structures and IPC protocol used for
//! communication between the player (`playout`) and the control client
//! (`playoutctl`).
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using JSON-serialized
//! messages, one per line. The client sends [`Command`] variants and receives
//! [`Response`] variants.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Command, StatusCategory, StatusRecord};
//!
//! // Ask the player for its session status
//! let json = serde_json::to_string(&Command::Query).unwrap();
//!
//! // Status records are keyed by category
//! let mut record = StatusRecord::new();
//! record.set(StatusCategory::Decode, "avc1 @ 1920x1080");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Error types shared between client and player.
///
/// All errors are serializable for transmission over IPC.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum PlayoutStatusError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Session error: {0}")]
    Session(String),
}

impl From<std::io::Error> for PlayoutStatusError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PlayoutStatusError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// Commands sent from client to player via IPC.
#[derive(Debug, Serialize, Deserialize)]
pub enum Command {
    /// Ping the player
    Ping,
    /// Query the current playback session
    Query,
    /// Tear down the playback session and exit
    Stop,
}

/// Response from player to client
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Pong,
    Error(PlayoutStatusError),
    Status(SessionStatus),
}

/// Snapshot of a playback session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub source: String,
    pub renderer: RendererBackend,
    pub phase: PlayoutPhase,
    pub frames_decoded: u64,
    pub frames_drawn: u64,
    pub frames_late: u64,
    pub decode_errors: u64,
    pub render_errors: u64,
    pub buffered_frames: usize,
    pub decode_fps: Option<f64>,
    /// Latest value reported for each status category
    pub status: StatusRecord,
}

/// Where the playout scheduler currently is in its state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlayoutPhase {
    /// No decoded frame is available and no render step is scheduled
    Underflowed,
    /// A render step is scheduled
    Playing,
    /// Input ended and every frame has been presented
    Finished,
}

impl PlayoutPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Underflowed => "underflowed",
            Self::Playing => "playing",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for PlayoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Category of a status event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    /// Fetching the source
    Fetch,
    /// Container demultiplexing
    Demux,
    /// Decoder configuration and decode failures
    Decode,
    /// Presentation rate and draw failures
    Render,
}

impl StatusCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Demux => "demux",
            Self::Decode => "decode",
            Self::Render => "render",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Merged status messages keyed by category.
///
/// Setting a category that is already present replaces its message.
///
/// # Examples
///
/// ```
/// use common::{StatusCategory, StatusRecord};
///
/// let mut record = StatusRecord::new();
/// record.set(StatusCategory::Render, "24 fps");
/// record.set(StatusCategory::Render, "25 fps");
/// assert_eq!(record.len(), 1);
/// assert_eq!(record.get(StatusCategory::Render), Some("25 fps"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct StatusRecord(BTreeMap<StatusCategory, String>);

impl StatusRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message for a category, replacing any earlier one
    pub fn set(&mut self, category: StatusCategory, message: impl Into<String>) {
        self.0.insert(category, message.into());
    }

    pub fn get(&self, category: StatusCategory) -> Option<&str> {
        self.0.get(&category).map(String::as_str)
    }

    /// Fold a newer record into this one
    pub fn merge(&mut self, newer: StatusRecord) {
        self.0.extend(newer.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StatusCategory, &str)> {
        self.0.iter().map(|(category, message)| (*category, message.as_str()))
    }
}

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (category, message) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", category, message)?;
            first = false;
        }
        Ok(())
    }
}

/// Presentation backend selected at session start
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RendererBackend {
    /// CPU copy/scale into the target surface
    #[default]
    Raster,
    /// Texture upload and direct copy-back, no shader stage
    GpuImmediate,
    /// Texture upload and shader-based scaling into a render target
    GpuModern,
}

impl RendererBackend {
    /// Parse a backend name (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "raster" | "2d" => Some(Self::Raster),
            "gpu-immediate" | "gpu_immediate" | "webgl" => Some(Self::GpuImmediate),
            "gpu-modern" | "gpu_modern" | "webgpu" => Some(Self::GpuModern),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Raster => "raster",
            Self::GpuImmediate => "gpu-immediate",
            Self::GpuModern => "gpu-modern",
        }
    }

    pub fn is_gpu(&self) -> bool {
        !matches!(self, Self::Raster)
    }
}

impl fmt::Display for RendererBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoder configuration, supplied once per session by the source before
/// the first chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Codec identifier (e.g. "avc1", "vp09", "raw")
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
}

impl fmt::Display for DecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {}x{}",
            self.codec, self.coded_width, self.coded_height
        )
    }
}

/// IPC socket path helper
pub fn get_socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));

    std::path::PathBuf::from(runtime_dir).join("playout.sock")
}
