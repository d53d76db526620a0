//! `OpsDesk` console: presence and messaging over a line-oriented terminal.
//!
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/opsdesk/config.toml`).
//!
//! ```bash
//! cargo run --bin opsdesk -- --relay-url ws://127.0.0.1:9000/ws \
//!     --username alice --user-type agent
//!
//! # Or via environment variables
//! OPSDESK_USERNAME=carol OPSDESK_USER_TYPE=teamleader cargo run --bin opsdesk
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use opsdesk::client::PresenceClient;
use opsdesk::config::{CliArgs, ClientConfig};
use opsdesk::console::{self, ParseError};
use opsdesk::transport::websocket::WsConnector;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let presence = match config.to_presence_config() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file; stdout belongs to the console.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(
        relay = %config.relay_url,
        username = %presence.registration.username,
        log_id = %presence.registration.log_id,
        "opsdesk starting"
    );

    let connector =
        WsConnector::new(config.relay_url.as_str()).with_connect_timeout(config.connect_timeout);
    let (client, mut events) = PresenceClient::start(presence, connector);
    println!("logged in as {} (type /help)", client.local_user());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(line) = console::describe_event(&event) {
                    println!("{line}");
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read stdin");
                        break;
                    }
                };
                let reply = match console::parse(&line) {
                    Ok(command) => console::run(&client, command),
                    Err(ParseError::Empty) => continue,
                    Err(e) => {
                        println!("{e}");
                        continue;
                    }
                };
                for line in &reply.lines {
                    println!("{line}");
                }
                if reply.quit {
                    break;
                }
            }
        }
    }

    client.disconnect();
    client.join().await;
    tracing::info!("opsdesk exiting");
    ExitCode::SUCCESS
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("opsdesk.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
