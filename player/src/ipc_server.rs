use anyhow::Result;
use common::{Command, PlayoutStatusError, Response, SessionStatus};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, Notify};

use crate::PlayerState;

pub async fn start(state: Arc<Mutex<PlayerState>>, stop: Arc<Notify>) -> Result<()> {
    let socket_path = common::get_socket_path();

    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("IPC server listening on: {}", socket_path.display());

    loop {
        if state.lock().await.should_exit {
            break;
        }

        // Accept connections with timeout
        let accept_result =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, _addr))) => {
                let state = state.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, state, stop).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => {
                // Timeout, continue loop to check exit condition
                continue;
            }
        }
    }

    crate::log_and_continue!(std::fs::remove_file(&socket_path), "remove IPC socket");
    log::info!("IPC server stopped");
    Ok(())
}

async fn handle_client(
    stream: UnixStream,
    state: Arc<Mutex<PlayerState>>,
    stop: Arc<Notify>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = parse_and_handle(&line, &state, &stop).await;

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn parse_and_handle(
    line: &str,
    state: &Arc<Mutex<PlayerState>>,
    stop: &Arc<Notify>,
) -> Response {
    match serde_json::from_str::<Command>(line) {
        Ok(command) => handle_command(command, state, stop).await,
        Err(e) => {
            log::warn!("Invalid command: {}", e);
            Response::Error(PlayoutStatusError::Ipc(format!("Invalid command: {}", e)))
        }
    }
}

async fn handle_command(
    command: Command,
    state: &Arc<Mutex<PlayerState>>,
    stop: &Arc<Notify>,
) -> Response {
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Query => {
            let state = state.lock().await;
            match state.session_status() {
                Some(status) => Response::Status(status),
                None => Response::Error(PlayoutStatusError::Session(
                    "No playback session".to_string(),
                )),
            }
        }

        Command::Stop => {
            log::info!("Stop requested over IPC");
            state.lock().await.should_exit = true;
            stop.notify_one();
            Response::Ok
        }
    }
}

impl PlayerState {
    /// Snapshot for `Query` responses
    pub fn session_status(&self) -> Option<SessionStatus> {
        let monitor = self.session.as_ref()?;
        let stats = monitor.stats();

        Some(SessionStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.uptime_secs(),
            source: monitor.source().to_string(),
            renderer: monitor.backend(),
            phase: monitor.phase(),
            frames_decoded: stats.frames_decoded,
            frames_drawn: stats.frames_drawn,
            frames_late: stats.frames_late,
            decode_errors: stats.decode_errors,
            render_errors: stats.render_errors,
            buffered_frames: monitor.buffered_frames(),
            decode_fps: stats.decode_fps,
            status: self.status.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{PlayoutPhase, StatusCategory};

    fn state() -> Arc<Mutex<PlayerState>> {
        Arc::new(Mutex::new(PlayerState::new()))
    }

    #[tokio::test]
    async fn test_ping() {
        let response = parse_and_handle("\"Ping\"\n", &state(), &Arc::new(Notify::new())).await;
        assert!(matches!(response, Response::Pong));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let response = parse_and_handle("{not json\n", &state(), &Arc::new(Notify::new())).await;
        assert!(matches!(
            response,
            Response::Error(PlayoutStatusError::Ipc(_))
        ));
    }

    #[tokio::test]
    async fn test_query_without_session() {
        let response = parse_and_handle("\"Query\"", &state(), &Arc::new(Notify::new())).await;
        assert!(matches!(
            response,
            Response::Error(PlayoutStatusError::Session(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_sets_exit_and_notifies() {
        let state = state();
        let stop = Arc::new(Notify::new());

        let response = parse_and_handle("\"Stop\"", &state, &stop).await;
        assert!(matches!(response, Response::Ok));
        assert!(state.lock().await.should_exit);

        // The stored permit wakes a later waiter
        tokio::time::timeout(std::time::Duration::from_secs(1), stop.notified())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_reports_session() {
        use player::source::create_source;
        use player::presenter::RasterPresenter;
        use player::surface::Surface;
        use player::{PlaybackSession, PlayoutSettings};

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let source = create_source("test://4x4@30/3").unwrap();
        let presenter = Box::new(RasterPresenter::new(Surface::anonymous(4, 4).unwrap()));
        let mut session =
            PlaybackSession::start_with(source, presenter, PlayoutSettings::default(), tx)
                .await
                .unwrap();
        session.wait().await;

        let state = state();
        {
            let mut state = state.lock().await;
            state.session = Some(session.monitor());
            state.status.set(StatusCategory::Render, "30 fps");
        }

        match parse_and_handle("\"Query\"", &state, &Arc::new(Notify::new())).await {
            Response::Status(status) => {
                assert_eq!(status.phase, PlayoutPhase::Finished);
                assert_eq!(status.frames_drawn, 3);
                assert_eq!(status.source, "test pattern 4x4@30fps (3 frames)");
                assert_eq!(status.status.get(StatusCategory::Render), Some("30 fps"));
            }
            other => panic!("unexpected response {:?}", other),
        }

        session.shutdown().await;
    }
}
