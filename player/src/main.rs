mod config;
mod ipc_server;
mod macros;

use anyhow::{Context, Result};
use clap::Parser;
use common::StatusRecord;
use player::surface::SurfaceSpec;
use player::{PlaybackSession, SessionMonitor, SessionOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, mpsc};

#[derive(Parser, Debug)]
#[command(name = "playout")]
#[command(about = "Paced video playout into a memory-mapped surface", long_about = None)]
#[command(version)]
struct Args {
    /// Source to play: an MP4 file or test://WxH[@FPS][/FRAMES][?burst]
    #[arg(short, long, env = "PLAYOUT_SOURCE")]
    source: Option<String>,

    /// Presentation backend: raster, gpu-immediate or gpu-modern
    #[arg(short, long)]
    renderer: Option<String>,

    /// Surface width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Surface height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// File to map as the target surface (anonymous when omitted)
    #[arg(long)]
    surface: Option<String>,

    /// Configuration file (defaults to ~/.config/playout/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => config::Config::load_from_path(path)?,
        None => config::Config::load()?,
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.general.log_level.as_str()),
    )
    .init();

    log::info!("Starting playout v{}", env!("CARGO_PKG_VERSION"));

    // Command line overrides the config file
    if let Some(source) = args.source {
        config.session.source = Some(source);
    }
    if let Some(renderer) = args.renderer {
        config.session.renderer = renderer;
    }
    if let Some(width) = args.width {
        config.session.width = width;
    }
    if let Some(height) = args.height {
        config.session.height = height;
    }
    if let Some(surface) = args.surface {
        config.session.surface_path = Some(surface);
    }
    config.validate()?;

    let source = config
        .session
        .source
        .clone()
        .context("No source given (use --source or set session.source in the config)")?;

    let options = SessionOptions {
        source,
        renderer: config.renderer(),
        surface: SurfaceSpec {
            width: config.session.width,
            height: config.session.height,
            path: config.surface_path(),
        },
        background: config.background(),
        playout: config.playout_settings(),
    };
    log::info!(
        "Session: {} on {}x{} {} surface (high-water mark {}, admission every {:?})",
        options.source,
        options.surface.width,
        options.surface.height,
        options.renderer,
        options.playout.high_water_mark,
        options.playout.admission_interval
    );

    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let mut session = PlaybackSession::start(options, status_tx).await?;

    let mut player_state = PlayerState::new();
    player_state.session = Some(session.monitor());
    let state = Arc::new(Mutex::new(player_state));
    let stop = Arc::new(Notify::new());

    // Host side of the status channel
    let status_state = state.clone();
    let status_handle = tokio::spawn(receive_status(status_state, status_rx));

    // Start IPC server
    let ipc_state = state.clone();
    let ipc_stop = stop.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::start(ipc_state, ipc_stop).await {
            log::error!("IPC server error: {}", e);
        }
    });

    // Set up signal handlers
    let signal_state = state.clone();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                log::error!("Failed to set up signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_state.lock().await.should_exit = true;
        signal_stop.notify_one();
    });

    tokio::select! {
        _ = session.wait() => {
            log::info!("Playback finished");
        }
        _ = stop.notified() => {
            log::info!("Stop requested");
        }
    }

    state.lock().await.should_exit = true;
    session.shutdown().await;

    // The session's status sender is gone, so the receiver drains and exits
    crate::log_and_continue!(status_handle.await, "drain status records");
    crate::log_and_continue!(ipc_handle.await, "stop IPC server");

    log::info!("Player shutting down");
    Ok(())
}

async fn receive_status(
    state: Arc<Mutex<PlayerState>>,
    mut records: mpsc::UnboundedReceiver<StatusRecord>,
) {
    while let Some(record) = records.recv().await {
        log::info!("Status: {}", record);
        state.lock().await.status.merge(record);
    }
}

/// Shared player state
pub struct PlayerState {
    pub should_exit: bool,
    pub start_time: std::time::Instant,
    pub session: Option<SessionMonitor>,
    /// Latest message per status category
    pub status: StatusRecord,
}

impl PlayerState {
    fn new() -> Self {
        Self {
            should_exit: false,
            start_time: std::time::Instant::now(),
            session: None,
            status: StatusRecord::new(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
