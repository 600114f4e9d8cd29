//! Playback statistics tracking
//!
//! Counters are shared between the decoder output path, the admission task,
//! the playout loop and the IPC server, so they are plain atomics.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks playback statistics for one session
#[derive(Debug, Default)]
pub struct PlaybackStats {
    /// Chunks handed to the decoder
    chunks_admitted: AtomicU64,

    /// Frames delivered by the decoder
    frames_decoded: AtomicU64,

    /// Frames painted by the presenter
    frames_drawn: AtomicU64,

    /// Frames whose deadline had already passed when their render step began
    frames_late: AtomicU64,

    /// Times the playout loop found the buffer empty
    underflows: AtomicU64,

    decode_errors: AtomicU64,

    render_errors: AtomicU64,

    /// Decoder output rate
    decode_fps: Mutex<Option<f64>>,
}

/// Point-in-time copy of [`PlaybackStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub chunks_admitted: u64,
    pub frames_decoded: u64,
    pub frames_drawn: u64,
    pub frames_late: u64,
    pub underflows: u64,
    pub decode_errors: u64,
    pub render_errors: u64,
    pub decode_fps: Option<f64>,
}

impl StatsSnapshot {
    /// Share of drawn frames that were late, as a percentage
    pub fn late_rate(&self) -> f64 {
        if self.frames_drawn == 0 {
            0.0
        } else {
            (self.frames_late as f64 / self.frames_drawn as f64) * 100.0
        }
    }
}

impl PlaybackStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.chunks_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drawn(&self) {
        self.frames_drawn.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late(&self) {
        self.frames_late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_underflow(&self) {
        self.underflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render_error(&self) {
        self.render_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_decode_fps(&self, fps: f64) {
        if let Ok(mut current) = self.decode_fps.lock() {
            *current = Some(fps);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chunks_admitted: self.chunks_admitted.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_drawn: self.frames_drawn.load(Ordering::Relaxed),
            frames_late: self.frames_late.load(Ordering::Relaxed),
            underflows: self.underflows.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            render_errors: self.render_errors.load(Ordering::Relaxed),
            decode_fps: self.decode_fps.lock().ok().and_then(|fps| *fps),
        }
    }

    /// Log a one-line summary of the counters
    pub fn log_stats(&self, buffered: usize) {
        let s = self.snapshot();
        log::info!(
            "Playout stats ({:.1} fps decoded): {} admitted, {} decoded, {} drawn, {} late ({:.1}%), {} buffered, {} underflows, {} decode errors, {} render errors",
            s.decode_fps.unwrap_or(0.0),
            s.chunks_admitted,
            s.frames_decoded,
            s.frames_drawn,
            s.frames_late,
            s.late_rate(),
            buffered,
            s.underflows,
            s.decode_errors,
            s.render_errors
        );
    }
}
