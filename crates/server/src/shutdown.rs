//! Signal handling for graceful shutdown.

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};

/// Completes when SIGTERM or SIGINT (Ctrl+C) is received.
pub async fn shutdown_signal() -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!(
                event_name = "system.server.signal",
                signal = "SIGTERM",
                "received SIGTERM, initiating graceful shutdown"
            );
        }
        _ = sigint.recv() => {
            tracing::info!(
                event_name = "system.server.signal",
                signal = "SIGINT",
                "received SIGINT, initiating graceful shutdown"
            );
        }
    }
    Ok(())
}
