//! Playout scheduler
//!
//! Drives presentation of decoded frames at the wall-clock instants their
//! timestamps demand. The loop alternates between two states:
//!
//! - `UNDERFLOWED`: the buffer was empty at the last check; nothing is
//!   scheduled until the decoder output path pushes a frame and wakes us.
//! - `PLAYING`: a frame was dequeued; we sleep until its deadline, draw it,
//!   release it and immediately check the buffer again.
//!
//! Deadlines are open-loop: media time zero is anchored to the wall clock
//! at the first render step and never re-anchored. After a decode stall the
//! backlog plays back-to-back with zero delay until wall time catches up;
//! no frame is skipped. A frame whose step starts more than one frame
//! interval after its deadline is counted as late.

use common::StatusCategory;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::frame::DecodedFrame;
use crate::frame_buffer::{FrameBuffer, NextFrame};
use crate::presenter::Presenter;
use crate::stats::PlaybackStats;
use crate::status::StatusReporter;

/// Timing state of one playback session
#[derive(Debug, Default, Clone)]
pub struct PlayoutState {
    /// Wall-clock instant of media time zero, fixed at the first render step
    base_wall_time: Option<Instant>,

    /// Frames delivered by the decoder after the first one
    frame_count: u64,

    /// When the decoder delivered its first frame
    first_frame_wall_time: Option<Instant>,
}

impl PlayoutState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_wall_time(&self) -> Option<Instant> {
        self.base_wall_time
    }

    /// Wall-clock deadline for a frame, anchoring the session on first use
    pub fn deadline(&mut self, media_time: Duration, now: Instant) -> Instant {
        let base = *self.base_wall_time.get_or_insert(now);
        base + media_time
    }

    /// How long to wait before presenting a frame at `media_time`:
    /// `max(0, media_time - (now - base))`
    pub fn time_until_next_frame(&mut self, media_time: Duration, now: Instant) -> Duration {
        self.deadline(media_time, now).saturating_duration_since(now)
    }

    /// How far `now` is past the deadline of `media_time`; zero before the
    /// session is anchored
    pub fn lag(&self, media_time: Duration, now: Instant) -> Duration {
        self.base_wall_time
            .map_or(Duration::ZERO, |base| now.saturating_duration_since(base + media_time))
    }

    /// Account for one decoded frame and return the decode rate once it can
    /// be measured
    pub fn record_decoded_frame(&mut self, now: Instant) -> Option<f64> {
        let Some(first) = self.first_frame_wall_time else {
            self.first_frame_wall_time = Some(now);
            return None;
        };

        self.frame_count += 1;
        let elapsed = now.saturating_duration_since(first).as_secs_f64();
        if elapsed > 0.0 {
            Some(self.frame_count as f64 / elapsed)
        } else {
            None
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

/// Shared handle to the session's timing state
pub type SharedPlayoutState = Arc<Mutex<PlayoutState>>;

/// The presentation loop
pub struct PlayoutScheduler {
    buffer: Arc<FrameBuffer>,
    state: SharedPlayoutState,
    presenter: Box<dyn Presenter>,
    status: StatusReporter,
    stats: Arc<PlaybackStats>,
    stats_interval: Duration,
    last_stats_log: Instant,
    last_timestamp: Option<i64>,
    /// Latest positive gap between consecutive frame timestamps
    frame_interval: Option<Duration>,
}

impl PlayoutScheduler {
    pub fn new(
        buffer: Arc<FrameBuffer>,
        state: SharedPlayoutState,
        presenter: Box<dyn Presenter>,
        status: StatusReporter,
        stats: Arc<PlaybackStats>,
    ) -> Self {
        Self {
            buffer,
            state,
            presenter,
            status,
            stats,
            stats_interval: Duration::from_secs(3),
            last_stats_log: Instant::now(),
            last_timestamp: None,
            frame_interval: None,
        }
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Run until the buffer reports end of input
    pub async fn run(mut self) {
        log::info!(
            "Playout loop started ({} presenter)",
            self.presenter.backend()
        );

        loop {
            match self.buffer.next_frame() {
                NextFrame::Frame(frame) => self.render_frame(frame).await,
                NextFrame::Underflow => {
                    log::debug!("Frame buffer underflow, waiting for decoded frames");
                    self.stats.record_underflow();
                    self.buffer.frame_available().await;
                }
                NextFrame::Finished => break,
            }
        }

        log::info!("Playout loop finished, all frames presented");
        self.stats.log_stats(self.buffer.len());
    }

    /// Track the spacing of frame timestamps; a non-increasing timestamp
    /// keeps the previous interval
    fn update_frame_interval(&mut self, timestamp: i64) -> Option<Duration> {
        if let Some(previous) = self.last_timestamp.replace(timestamp)
            && let Ok(gap) = u64::try_from(timestamp - previous)
            && gap > 0
        {
            self.frame_interval = Some(Duration::from_micros(gap));
        }
        self.frame_interval
    }

    /// One render step: wait for the frame's deadline, draw it, release it
    async fn render_frame(&mut self, frame: DecodedFrame) {
        let now = Instant::now();
        let (delay, lag) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let delay = state.time_until_next_frame(frame.media_time(), now);
            (delay, state.lag(frame.media_time(), now))
        };
        let frame_interval = self.update_frame_interval(frame.timestamp());

        if !delay.is_zero() {
            log::trace!(
                "Frame {}us due in {:.1}ms",
                frame.timestamp(),
                delay.as_secs_f64() * 1000.0
            );
            tokio::time::sleep(delay).await;
        } else if let Some(interval) = frame_interval
            && lag > interval
        {
            self.stats.record_late();
            log::trace!(
                "Frame {}us is {:.1}ms late, presenting immediately",
                frame.timestamp(),
                lag.as_secs_f64() * 1000.0
            );
        }

        #[cfg(feature = "profiling")]
        let draw_start = std::time::Instant::now();

        match self.presenter.draw(&frame) {
            Ok(()) => self.stats.record_drawn(),
            Err(e) => {
                log::warn!("Failed to draw frame {}us: {}", frame.timestamp(), e);
                self.stats.record_render_error();
                self.status
                    .set_status(StatusCategory::Render, format!("draw failed: {}", e));
            }
        }

        #[cfg(feature = "profiling")]
        log::debug!(
            "[PROFILE] Frame {}us drawn in {:.2}ms",
            frame.timestamp(),
            draw_start.elapsed().as_secs_f64() * 1000.0
        );

        frame.close();

        if self.last_stats_log.elapsed() >= self.stats_interval {
            self.stats.log_stats(self.buffer.len());
            self.last_stats_log = Instant::now();
        }
    }
}
