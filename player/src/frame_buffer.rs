//! Decoded frame buffer shared by the decoder output path and the playout loop
//!
//! The decoder output path may run on a decoder-owned thread, so the queue is
//! mutex-protected. The empty-to-non-empty transition is decided under the
//! same lock as the enqueue and signalled through a [`Notify`] permit, which
//! is stored when the playout loop is not waiting yet. A resume can therefore
//! never be lost between the loop finding the queue empty and going to sleep.
//! A permit is only sent after [`FrameBuffer::next_frame`] has reported an
//! underflow, so no stale permit outlives the wait it was meant for.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::frame::DecodedFrame;

/// Outcome of asking the buffer for the next frame to present
#[derive(Debug)]
pub enum NextFrame {
    Frame(DecodedFrame),
    /// Buffer is empty; the caller must wait for [`FrameBuffer::frame_available`]
    Underflow,
    /// Buffer is empty and no more frames will arrive
    Finished,
}

struct BufferState {
    frames: VecDeque<DecodedFrame>,
    underflow: bool,
    /// The last `next_frame` reported an underflow and nobody has woken the
    /// caller since
    waiter: bool,
    input_finished: bool,
    closed: bool,
}

/// FIFO of decoded frames plus the underflow flag
pub struct FrameBuffer {
    state: Mutex<BufferState>,
    wake: Notify,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                frames: VecDeque::new(),
                underflow: true,
                waiter: false,
                input_finished: false,
                closed: false,
            }),
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a decoded frame.
    ///
    /// Returns `true` when the frame ended an underflow. The playout loop is
    /// woken only if it was told to wait. Frames pushed after
    /// [`close`](Self::close) are released immediately.
    pub fn push(&self, frame: DecodedFrame) -> bool {
        let mut state = self.lock();
        if state.closed {
            drop(state);
            log::trace!("Frame {} arrived after teardown, releasing", frame.timestamp());
            frame.close();
            return false;
        }

        state.frames.push_back(frame);
        let resumed = state.underflow;
        state.underflow = false;
        let wake = std::mem::take(&mut state.waiter);
        drop(state);

        if wake {
            self.wake.notify_one();
        }
        resumed
    }

    /// Dequeue the oldest frame, re-evaluating the underflow flag
    pub fn next_frame(&self) -> NextFrame {
        let mut state = self.lock();
        match state.frames.pop_front() {
            Some(frame) => {
                state.underflow = false;
                NextFrame::Frame(frame)
            }
            None => {
                state.underflow = true;
                if state.input_finished {
                    NextFrame::Finished
                } else {
                    state.waiter = true;
                    NextFrame::Underflow
                }
            }
        }
    }

    /// Wait until a frame arrives after an underflow (or input finishes).
    /// Only meaningful after [`next_frame`](Self::next_frame) returned
    /// [`NextFrame::Underflow`].
    pub async fn frame_available(&self) {
        self.wake.notified().await;
    }

    /// Mark that the decoder will not produce any more frames
    pub fn finish_input(&self) {
        let mut state = self.lock();
        state.input_finished = true;
        let waiting = std::mem::take(&mut state.waiter);
        drop(state);

        if waiting {
            self.wake.notify_one();
        }
    }

    /// Stop accepting frames and release everything buffered.
    ///
    /// Returns how many frames were released.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        state.input_finished = true;
        let frames = std::mem::take(&mut state.frames);
        state.underflow = true;
        let waiting = std::mem::take(&mut state.waiter);
        drop(state);

        if waiting {
            self.wake.notify_one();
        }

        let released = frames.len();
        drop(frames);
        released
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    /// Underflow flag as of the last scheduler check or enqueue
    pub fn is_underflowed(&self) -> bool {
        self.lock().underflow
    }

    pub fn is_input_finished(&self) -> bool {
        self.lock().input_finished
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn frame(timestamp: i64) -> DecodedFrame {
        DecodedFrame::new(vec![0; 4], timestamp, 1, 1)
    }

    fn counted_frame(timestamp: i64, released: &Arc<AtomicUsize>) -> DecodedFrame {
        let counter = released.clone();
        frame(timestamp).with_release_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_starts_underflowed() {
        let buffer = FrameBuffer::new();
        assert!(buffer.is_underflowed());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let buffer = FrameBuffer::new();
        for ts in [0, 33_000, 66_000] {
            buffer.push(frame(ts));
        }
        assert_eq!(buffer.len(), 3);

        let mut order = Vec::new();
        while let NextFrame::Frame(f) = buffer.next_frame() {
            order.push(f.timestamp());
        }
        assert_eq!(order, vec![0, 33_000, 66_000]);
    }

    #[test]
    fn test_only_first_arrival_resumes() {
        let buffer = FrameBuffer::new();
        assert!(buffer.push(frame(0)));
        assert!(!buffer.push(frame(1)));
        assert!(!buffer.is_underflowed());

        // Drain: the empty check sets underflow again
        while let NextFrame::Frame(_) = buffer.next_frame() {}
        assert!(buffer.is_underflowed());
        assert!(buffer.push(frame(2)));
    }

    #[test]
    fn test_finished_after_input_ends() {
        let buffer = FrameBuffer::new();
        buffer.push(frame(0));
        buffer.finish_input();

        assert!(matches!(buffer.next_frame(), NextFrame::Frame(_)));
        assert!(matches!(buffer.next_frame(), NextFrame::Finished));
    }

    #[tokio::test]
    async fn test_wakeup_not_lost_when_push_precedes_wait() {
        let buffer = Arc::new(FrameBuffer::new());
        assert!(matches!(buffer.next_frame(), NextFrame::Underflow));

        // Frame arrives before the loop starts waiting: permit is stored
        buffer.push(frame(0));
        tokio::time::timeout(Duration::from_secs(1), buffer.frame_available())
            .await
            .expect("wake-up was lost");
        assert!(matches!(buffer.next_frame(), NextFrame::Frame(_)));
    }

    #[tokio::test]
    async fn test_wakeup_from_other_thread() {
        let buffer = Arc::new(FrameBuffer::new());
        assert!(matches!(buffer.next_frame(), NextFrame::Underflow));

        let producer = buffer.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(frame(42));
        });

        tokio::time::timeout(Duration::from_secs(5), buffer.frame_available())
            .await
            .expect("no wake-up from producer thread");
        handle.join().unwrap();

        match buffer.next_frame() {
            NextFrame::Frame(f) => assert_eq!(f.timestamp(), 42),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_stale_wakeup_from_initial_push() {
        let buffer = FrameBuffer::new();

        // Pushed before the playout loop ever looked at the buffer
        assert!(buffer.push(frame(0)));
        assert!(matches!(buffer.next_frame(), NextFrame::Frame(_)));
        assert!(matches!(buffer.next_frame(), NextFrame::Underflow));

        // Nothing arrived since the drain, so the wait must not return
        let waited =
            tokio::time::timeout(Duration::from_millis(50), buffer.frame_available()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_close_releases_buffered_and_late_frames() {
        let released = Arc::new(AtomicUsize::new(0));
        let buffer = FrameBuffer::new();
        for ts in 0..5 {
            buffer.push(counted_frame(ts, &released));
        }

        assert_eq!(buffer.close(), 5);
        assert_eq!(released.load(Ordering::SeqCst), 5);

        assert!(!buffer.push(counted_frame(6, &released)));
        assert_eq!(released.load(Ordering::SeqCst), 6);
        assert!(buffer.is_empty());
        assert!(matches!(buffer.next_frame(), NextFrame::Finished));
    }
}
