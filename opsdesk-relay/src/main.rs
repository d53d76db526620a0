//! `opsdesk-relay`: fan-out server for `OpsDesk` presence clients.
//!
//! ```bash
//! opsdesk-relay --bind 127.0.0.1:9000 --max-frame-size 16384
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use opsdesk_relay::config::RelayArgs;
use opsdesk_relay::relay::{RelayState, start_server_with_state};

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match RelayArgs::parse().settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("opsdesk-relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    // RUST_LOG, when set, replaces the configured level entirely.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state = Arc::new(RelayState::with_max_frame_size(settings.max_frame_size));
    let (addr, server) = match start_server_with_state(settings.bind_addr, state).await {
        Ok(bound) => bound,
        Err(e) => {
            tracing::error!(addr = %settings.bind_addr, error = %e, "cannot listen");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, max_frame_size = settings.max_frame_size, "relay listening on /ws");

    match server.await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "relay server task panicked");
            ExitCode::FAILURE
        }
    }
}
