/// End-to-end timing tests for the playout path.
///
/// All tests run on a paused tokio clock, so sleeps resolve exactly at
/// their deadlines and draw instants can be compared without slack.
use common::{DecoderConfig, RendererBackend, StatusCategory, StatusRecord};
use player::frame::{ChunkType, DecodedFrame, EncodedChunk};
use player::frame_buffer::FrameBuffer;
use player::presenter::Presenter;
use player::scheduler::{PlayoutScheduler, PlayoutState};
use player::source::{Source, SourceOutput};
use player::stats::PlaybackStats;
use player::status::StatusReporter;
use player::{PlaybackSession, PlayoutSettings};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type DrawLog = Arc<Mutex<Vec<(Instant, i64)>>>;
type ReleaseLog = Arc<Mutex<HashMap<i64, usize>>>;

/// Presenter that records when each timestamp was drawn
struct RecordingPresenter {
    draws: DrawLog,
}

impl Presenter for RecordingPresenter {
    fn backend(&self) -> RendererBackend {
        RendererBackend::Raster
    }

    fn draw(&mut self, frame: &DecodedFrame) -> player::Result<()> {
        self.draws
            .lock()
            .unwrap()
            .push((Instant::now(), frame.timestamp()));
        Ok(())
    }
}

fn tracked_frame(timestamp: i64, releases: &ReleaseLog) -> DecodedFrame {
    let releases = releases.clone();
    DecodedFrame::new(vec![0, 0, 0, 255], timestamp, 1, 1).with_release_hook(move |ts| {
        *releases.lock().unwrap().entry(ts).or_default() += 1;
    })
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn offsets(draws: &DrawLog, t0: Instant) -> Vec<(Duration, i64)> {
    draws
        .lock()
        .unwrap()
        .iter()
        .map(|(at, ts)| (*at - t0, *ts))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_frames_drawn_at_media_deadlines_and_resume_after_underflow() {
    let t0 = Instant::now();
    let buffer = Arc::new(FrameBuffer::new());
    let stats = Arc::new(PlaybackStats::new());
    let draws = DrawLog::default();
    let releases = ReleaseLog::default();

    buffer.push(tracked_frame(0, &releases));
    buffer.push(tracked_frame(33_000, &releases));

    let scheduler = PlayoutScheduler::new(
        buffer.clone(),
        Arc::new(Mutex::new(PlayoutState::new())),
        Box::new(RecordingPresenter {
            draws: draws.clone(),
        }),
        StatusReporter::new(),
        stats.clone(),
    );
    let playout = tokio::spawn(scheduler.run());

    // Both buffered frames play on schedule, then the buffer runs dry
    tokio::time::sleep(ms(200)).await;
    assert_eq!(
        offsets(&draws, t0),
        vec![(ms(0), 0), (ms(33), 33_000)]
    );
    assert!(buffer.is_underflowed());

    // A stall pushed the next frame past its deadline: drawn at once, not dropped
    assert!(buffer.push(tracked_frame(66_000, &releases)));
    tokio::task::yield_now().await;

    // A frame still in the future keeps the original anchor
    buffer.push(tracked_frame(300_000, &releases));
    buffer.finish_input();

    playout.await.unwrap();

    assert_eq!(
        offsets(&draws, t0),
        vec![
            (ms(0), 0),
            (ms(33), 33_000),
            (ms(200), 66_000),
            (ms(300), 300_000)
        ]
    );

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.frames_drawn, 4);
    assert_eq!(snapshot.frames_late, 1);
    assert!(snapshot.underflows >= 1);

    let releases = releases.lock().unwrap();
    assert_eq!(releases.len(), 4);
    assert!(releases.values().all(|&count| count == 1));
}

#[tokio::test]
async fn test_teardown_releases_every_buffered_frame() {
    let buffer = FrameBuffer::new();
    let releases = ReleaseLog::default();

    for ts in [0, 33_000, 66_000] {
        buffer.push(tracked_frame(ts, &releases));
    }
    assert_eq!(buffer.close(), 3);

    // Frames the decoder emits after teardown are released on arrival
    assert!(!buffer.push(tracked_frame(99_000, &releases)));

    let releases = releases.lock().unwrap();
    assert_eq!(releases.len(), 4);
    assert!(releases.values().all(|&count| count == 1));
    assert!(buffer.is_empty());
}

/// Source that emits 1x1 raw chunks, stalling before the last one
struct StallingSource {
    timestamps: Vec<i64>,
    stall_before_last: Duration,
}

impl Source for StallingSource {
    fn describe(&self) -> String {
        "stalling source".to_string()
    }

    fn spawn(self: Box<Self>, mut output: SourceOutput) -> JoinHandle<()> {
        tokio::spawn(async move {
            output
                .configure(DecoderConfig {
                    codec: "raw".to_string(),
                    coded_width: 1,
                    coded_height: 1,
                })
                .unwrap();

            let last = self.timestamps.len() - 1;
            for (i, ts) in self.timestamps.into_iter().enumerate() {
                if i == last {
                    tokio::time::sleep(self.stall_before_last).await;
                }
                let chunk = EncodedChunk::new(vec![0, 0, 255, 255], ts, ChunkType::Key);
                if output.push(chunk).is_err() {
                    return;
                }
            }
            output.set_status(StatusCategory::Demux, "end of stream");
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_survives_decode_stall() {
    let t0 = Instant::now();
    let draws = DrawLog::default();
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();

    let source = Box::new(StallingSource {
        timestamps: vec![0, 33_000, 66_000],
        stall_before_last: ms(300),
    });
    let presenter = Box::new(RecordingPresenter {
        draws: draws.clone(),
    });

    let mut session =
        PlaybackSession::start_with(source, presenter, PlayoutSettings::default(), status_tx)
            .await
            .unwrap();
    session.wait().await;

    assert!(session.is_finished());
    let drawn = offsets(&draws, t0);
    assert_eq!(
        drawn.iter().map(|(_, ts)| *ts).collect::<Vec<_>>(),
        vec![0, 33_000, 66_000]
    );
    assert_eq!(drawn[0].0, ms(0));
    assert_eq!(drawn[1].0, ms(33));
    assert!(drawn[2].0 >= ms(300));

    let stats = session.stats();
    assert_eq!(stats.frames_decoded, 3);
    assert_eq!(stats.frames_late, 1);
    assert_eq!(stats.decode_errors, 0);

    let mut status = StatusRecord::new();
    while let Ok(record) = status_rx.try_recv() {
        status.merge(record);
    }
    assert_eq!(status.get(StatusCategory::Decode), Some("raw @ 1x1"));

    session.shutdown().await;
}
