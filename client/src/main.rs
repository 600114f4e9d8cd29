use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{Command, Response, SessionStatus};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "playoutctl")]
#[command(about = "Playout player control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the player to check if it's running
    Ping,

    /// Show the playback session status
    Status {
        /// Print the raw status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Tear down the playback session and stop the player
    Stop,

    /// Poll the session status until playback finishes
    Watch {
        /// Polling interval in milliseconds
        #[arg(short, long, default_value = "1000")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ping => handle_response(send_command(Command::Ping).await?),
        Commands::Stop => handle_response(send_command(Command::Stop).await?),
        Commands::Status { json } => match send_command(Command::Query).await? {
            Response::Status(status) if json => {
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            response => handle_response(response),
        },
        Commands::Watch { interval_ms } => watch(Duration::from_millis(interval_ms.max(10))).await?,
    }

    Ok(())
}

async fn send_command(command: Command) -> Result<Response> {
    let socket_path = common::get_socket_path();

    let stream = UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("Is the player running? ({})", socket_path.display()))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Send command
    let command_json = serde_json::to_string(&command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    // Read response
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

async fn watch(interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let status = match send_command(Command::Query).await {
            Ok(Response::Status(status)) => status,
            Ok(Response::Error(e)) => anyhow::bail!("{}", e),
            Ok(other) => anyhow::bail!("Unexpected response: {:?}", other),
            Err(_) => {
                println!("Player exited");
                return Ok(());
            }
        };

        println!("{}", summary_line(&status));
        if status.phase == common::PlayoutPhase::Finished {
            return Ok(());
        }
    }
}

fn summary_line(status: &SessionStatus) -> String {
    format!(
        "[{:>5}s] {:<11} drawn {:>6} late {:>4} buffered {:>3} decode {}",
        status.uptime_secs,
        status.phase,
        status.frames_drawn,
        status.frames_late,
        status.buffered_frames,
        format_fps(status.decode_fps)
    )
}

fn format_fps(fps: Option<f64>) -> String {
    match fps {
        Some(fps) => format!("{:.1} fps", fps),
        None => "-".to_string(),
    }
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Pong => {
            println!("✓ Player is running");
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Status(status) => {
            println!("Playout Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            println!("  Source: {}", status.source);
            println!("  Renderer: {}", status.renderer);
            println!("  Phase: {}", status.phase);
            println!("  Frames:");
            println!("    Decoded: {}", status.frames_decoded);
            println!("    Drawn: {}", status.frames_drawn);
            println!("    Late: {}", status.frames_late);
            println!("    Buffered: {}", status.buffered_frames);
            println!("  Decode rate: {}", format_fps(status.decode_fps));
            println!(
                "  Errors: {} decode, {} render",
                status.decode_errors, status.render_errors
            );
            if !status.status.is_empty() {
                println!("  Status:");
                for (category, message) in status.status.iter() {
                    println!("    {}: {}", category, message);
                }
            }
        }
    }
}
