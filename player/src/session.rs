//! Playback session: construction and teardown of one playout pipeline
//!
//! ```text
//! source ──chunks──▶ relay ──▶ admission ──▶ decoder ──frames──▶ buffer ──▶ playout ──▶ presenter
//!    └──────────────── status events ───────────────▶ status reporter ──records──▶ host
//! ```

use common::{PlayoutPhase, RendererBackend, StatusCategory, StatusRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::admission::{AdmissionController, DEFAULT_ADMISSION_INTERVAL, DEFAULT_HIGH_WATER_MARK};
use crate::chunk_relay;
use crate::decoder::{self, FrameSink};
use crate::error::{PlayoutError, Result};
use crate::frame_buffer::FrameBuffer;
use crate::presenter::{self, Presenter};
use crate::scheduler::{PlayoutScheduler, PlayoutState};
use crate::source::{self, Source, SourceOutput};
use crate::stats::{PlaybackStats, StatsSnapshot};
use crate::status::{StatusReporter, refresh_interval};
use crate::surface::{Surface, SurfaceSpec};

/// Tuning of the admission, status and statistics cadences
#[derive(Debug, Clone, PartialEq)]
pub struct PlayoutSettings {
    pub high_water_mark: usize,
    pub admission_interval: Duration,
    /// Display refresh rate in Hz; status records are flushed once per refresh
    pub refresh_rate: u32,
    pub stats_interval: Duration,
}

impl Default for PlayoutSettings {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            admission_interval: DEFAULT_ADMISSION_INTERVAL,
            refresh_rate: 60,
            stats_interval: Duration::from_secs(3),
        }
    }
}

/// What to play and where to present it
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub source: String,
    pub renderer: RendererBackend,
    pub surface: SurfaceSpec,
    /// RGBA the surface is cleared to before the first frame
    pub background: (u8, u8, u8, u8),
    pub playout: PlayoutSettings,
}

#[derive(Default)]
struct SessionTasks {
    flusher: Option<JoinHandle<()>>,
    source: Option<JoinHandle<()>>,
    admission: Option<JoinHandle<()>>,
    playout: Option<JoinHandle<()>>,
}

impl SessionTasks {
    fn abort_all(&self) {
        for handle in [&self.flusher, &self.source, &self.admission, &self.playout]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }

    async fn join_all(&mut self) {
        for handle in [
            self.playout.take(),
            self.admission.take(),
            self.source.take(),
            self.flusher.take(),
        ]
        .into_iter()
        .flatten()
        {
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                log::error!("Session task failed: {}", e);
            }
        }
    }
}

/// Read-only view of a running session, shareable with the IPC server
#[derive(Clone)]
pub struct SessionMonitor {
    source: String,
    backend: RendererBackend,
    buffer: Arc<FrameBuffer>,
    stats: Arc<PlaybackStats>,
    finished: Arc<AtomicBool>,
}

impl SessionMonitor {
    pub fn phase(&self) -> PlayoutPhase {
        if self.finished.load(Ordering::Acquire) {
            PlayoutPhase::Finished
        } else if self.buffer.is_underflowed() {
            PlayoutPhase::Underflowed
        } else {
            PlayoutPhase::Playing
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn backend(&self) -> RendererBackend {
        self.backend
    }
}

/// One running playback session
pub struct PlaybackSession {
    monitor: SessionMonitor,
    status: StatusReporter,
    status_sink: mpsc::UnboundedSender<StatusRecord>,
    tasks: SessionTasks,
}

impl PlaybackSession {
    /// Build the source, surface and presenter from `options` and start
    /// playing. Status records are delivered to `status_sink`.
    pub async fn start(
        options: SessionOptions,
        status_sink: mpsc::UnboundedSender<StatusRecord>,
    ) -> Result<Self> {
        let source = source::create_source(&options.source)?;

        let mut surface = Surface::create(&options.surface)?;
        let (r, g, b, a) = options.background;
        surface.fill_color(r, g, b, a);

        let presenter = presenter::create_presenter(options.renderer, surface).await?;

        Self::start_with(source, presenter, options.playout, status_sink).await
    }

    /// Start a session from already constructed collaborators.
    ///
    /// Fails with a configuration error when the source cannot announce a
    /// decoder configuration or no decoder supports it; nothing is drawn in
    /// that case.
    pub async fn start_with(
        source: Box<dyn Source>,
        presenter: Box<dyn Presenter>,
        settings: PlayoutSettings,
        status_sink: mpsc::UnboundedSender<StatusRecord>,
    ) -> Result<Self> {
        let description = source.describe();
        log::info!(
            "Starting playback of {} ({} presenter)",
            description,
            presenter.backend()
        );

        let buffer = Arc::new(FrameBuffer::new());
        let state = Arc::new(Mutex::new(PlayoutState::new()));
        let status = StatusReporter::new();
        let stats = Arc::new(PlaybackStats::new());

        // From here on, returning early tears down whatever was started
        let mut session = Self {
            monitor: SessionMonitor {
                source: description,
                backend: presenter.backend(),
                buffer: buffer.clone(),
                stats: stats.clone(),
                finished: Arc::new(AtomicBool::new(false)),
            },
            status: status.clone(),
            status_sink: status_sink.clone(),
            tasks: SessionTasks::default(),
        };

        session.tasks.flusher =
            Some(status.spawn_flusher(refresh_interval(settings.refresh_rate), status_sink));

        let (writer, reader) = chunk_relay::channel();
        let (output, config_rx) = SourceOutput::new(writer, status.clone());
        session.tasks.source = Some(source.spawn(output));

        let config = match config_rx.await {
            Ok(Ok(config)) => config,
            Ok(Err(e)) if e.is_fatal() => return Err(e),
            Ok(Err(e)) => return Err(PlayoutError::Configuration(e.to_string())),
            Err(_) => {
                return Err(PlayoutError::Configuration(
                    "Source ended without announcing a decoder configuration".into(),
                ));
            }
        };
        status.set_status(StatusCategory::Decode, config.to_string());

        let sink = FrameSink::new(buffer.clone(), state.clone(), status.clone(), stats.clone());
        let mut decoder = decoder::create_decoder(&config, sink.clone())?;
        decoder.configure(&config)?;

        let admission = AdmissionController::new(reader, decoder, buffer.clone(), sink, stats.clone())
            .with_high_water_mark(settings.high_water_mark)
            .with_interval(settings.admission_interval);
        session.tasks.admission = Some(tokio::spawn(admission.run()));

        let scheduler = PlayoutScheduler::new(buffer, state, presenter, status, stats)
            .with_stats_interval(settings.stats_interval);
        let finished = session.monitor.finished.clone();
        session.tasks.playout = Some(tokio::spawn(async move {
            scheduler.run().await;
            finished.store(true, Ordering::Release);
        }));

        Ok(session)
    }

    /// Wait until every frame has been presented
    pub async fn wait(&mut self) {
        if let Some(playout) = self.tasks.playout.as_mut()
            && let Err(e) = playout.await
            && !e.is_cancelled()
        {
            log::error!("Playout task failed: {}", e);
        }
        self.tasks.playout = None;
    }

    /// Stop every task and release all buffered frames
    pub async fn shutdown(mut self) {
        log::info!("Tearing down playback of {}", self.monitor.source);

        self.tasks.abort_all();
        self.tasks.join_all().await;

        let released = self.monitor.buffer.close();
        if released > 0 {
            log::debug!("Released {} unplayed frames", released);
        }

        // The flusher is gone; hand over what it had not sent yet
        if let Some(record) = self.status.take_pending()
            && self.status_sink.send(record).is_err()
        {
            log::debug!("Status sink closed, final status record dropped");
        }
        self.monitor.stats.log_stats(self.monitor.buffered_frames());
    }

    pub fn monitor(&self) -> SessionMonitor {
        self.monitor.clone()
    }

    pub fn phase(&self) -> PlayoutPhase {
        self.monitor.phase()
    }

    pub fn is_finished(&self) -> bool {
        self.phase() == PlayoutPhase::Finished
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.monitor.stats()
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.tasks.abort_all();
        self.monitor.buffer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::RasterPresenter;

    fn raster(width: u32, height: u32) -> Box<dyn Presenter> {
        Box::new(RasterPresenter::new(
            Surface::anonymous(width, height).unwrap(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_test_pattern_to_completion() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let source = source::create_source("test://8x4@30/5").unwrap();

        let mut session = PlaybackSession::start_with(source, raster(8, 4), PlayoutSettings::default(), tx)
            .await
            .unwrap();
        session.wait().await;

        assert!(session.is_finished());
        let stats = session.stats();
        assert_eq!(stats.frames_decoded, 5);
        assert_eq!(stats.frames_drawn, 5);
        assert_eq!(stats.render_errors, 0);
        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_delivers_last_status_record() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = source::create_source("test://8x4@30/5").unwrap();
        // One refresh per second: playback ends before the second flush
        let settings = PlayoutSettings {
            refresh_rate: 1,
            ..PlayoutSettings::default()
        };

        let mut session = PlaybackSession::start_with(source, raster(8, 4), settings, tx)
            .await
            .unwrap();
        session.wait().await;
        session.shutdown().await;

        let mut status = StatusRecord::new();
        while let Ok(record) = rx.try_recv() {
            status.merge(record);
        }
        assert_eq!(status.get(StatusCategory::Demux), Some("5 chunks produced"));
        assert_eq!(status.get(StatusCategory::Decode), Some("raw @ 8x4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_mismatch_is_scaled_not_failed() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let source = source::create_source("test://16x8@30/3?burst").unwrap();

        let mut session = PlaybackSession::start_with(source, raster(4, 2), PlayoutSettings::default(), tx)
            .await
            .unwrap();
        session.wait().await;

        assert_eq!(session.stats().frames_drawn, 3);
    }

    #[tokio::test]
    async fn test_zero_sized_surface_rejected() {
        let options = SessionOptions {
            source: "test://".into(),
            renderer: RendererBackend::Raster,
            surface: SurfaceSpec {
                width: 0,
                height: 0,
                path: None,
            },
            background: (0, 0, 0, 255),
            playout: PlayoutSettings::default(),
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(matches!(
            PlaybackSession::start(options, tx).await,
            Err(PlayoutError::Configuration(_))
        ));
    }
}
