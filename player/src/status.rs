//! Coalescing status reporter
//!
//! Status events arrive from the source, the decoder output path (possibly a
//! decoder-owned thread) and the playout loop. Everything reported within one
//! display-refresh interval is merged by category and emitted as a single
//! [`StatusRecord`], so the host sees at most one record per refresh.

use common::{StatusCategory, StatusRecord};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Refresh interval for a display refresh rate in Hz
pub fn refresh_interval(refresh_rate: u32) -> Duration {
    Duration::from_secs_f64(1.0 / refresh_rate.max(1) as f64)
}

/// Cloneable handle for reporting status events
#[derive(Clone, Default)]
pub struct StatusReporter {
    pending: Arc<Mutex<Option<StatusRecord>>>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event. A later event of the same category replaces an
    /// earlier one that has not been flushed yet.
    pub fn set_status(&self, category: StatusCategory, message: impl Into<String>) {
        let message = message.into();
        log::trace!("Status {}: {}", category, message);

        if let Ok(mut pending) = self.pending.lock() {
            pending
                .get_or_insert_with(StatusRecord::new)
                .set(category, message);
        }
    }

    /// Take the merged record accumulated since the last flush
    pub fn take_pending(&self) -> Option<StatusRecord> {
        self.pending.lock().ok()?.take()
    }

    /// Start the flush task. On every refresh tick the pending record (if
    /// any) is sent to `sink`. The task ends when the sink is closed.
    pub fn spawn_flusher(
        &self,
        refresh_interval: Duration,
        sink: mpsc::UnboundedSender<StatusRecord>,
    ) -> JoinHandle<()> {
        let reporter = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if let Some(record) = reporter.take_pending()
                    && sink.send(record).is_err()
                {
                    log::debug!("Status sink closed, stopping status flusher");
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_interval() {
        assert_eq!(refresh_interval(50), Duration::from_millis(20));
        assert_eq!(refresh_interval(0), Duration::from_secs(1));
    }

    #[test]
    fn test_events_coalesce_by_category() {
        let reporter = StatusReporter::new();
        assert!(reporter.take_pending().is_none());

        reporter.set_status(StatusCategory::Decode, "avc1 @ 640x360");
        reporter.set_status(StatusCategory::Render, "29 fps");
        reporter.set_status(StatusCategory::Render, "30 fps");

        let record = reporter.take_pending().unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.get(StatusCategory::Render), Some("30 fps"));
        assert!(reporter.take_pending().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_once_per_refresh() {
        let reporter = StatusReporter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let flusher = reporter.spawn_flusher(refresh_interval(60), tx);

        // Let the immediate first tick pass with nothing pending
        tokio::time::sleep(Duration::from_millis(1)).await;

        reporter.set_status(StatusCategory::Render, "first");
        tokio::time::sleep(Duration::from_millis(5)).await;
        reporter.set_status(StatusCategory::Render, "second");

        let record = rx.recv().await.unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.get(StatusCategory::Render), Some("second"));

        // Nothing reported since: no further records
        let next = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(next.is_err());

        flusher.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_in_separate_intervals_emit_separately() {
        let reporter = StatusReporter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let flusher = reporter.spawn_flusher(Duration::from_millis(10), tx);
        tokio::time::sleep(Duration::from_millis(1)).await;

        reporter.set_status(StatusCategory::Decode, "one");
        let first = rx.recv().await.unwrap();

        reporter.set_status(StatusCategory::Decode, "two");
        let second = rx.recv().await.unwrap();

        assert_eq!(first.get(StatusCategory::Decode), Some("one"));
        assert_eq!(second.get(StatusCategory::Decode), Some("two"));
        flusher.abort();
    }

    #[tokio::test]
    async fn test_flusher_stops_when_sink_closed() {
        let reporter = StatusReporter::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        reporter.set_status(StatusCategory::Fetch, "loading");
        let flusher = reporter.spawn_flusher(Duration::from_millis(1), tx);
        flusher.await.unwrap();
    }
}
