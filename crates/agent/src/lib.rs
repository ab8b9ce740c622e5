// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Looking Glass agent: dials the server, advertises its whitelisted
//! commands, and executes them on request.

pub mod config;
pub mod executor;
pub mod transport;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::executor::Executor;

/// Run the agent until shutdown (SIGINT/SIGTERM). Reconnects to the server
/// indefinitely on transport loss; only an explicit shutdown signal ends
/// the loop.
pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let executor = Executor::new(Arc::clone(&config));
    let shutdown = CancellationToken::new();

    spawn_signal_handler(shutdown.clone());

    transport::run(config, executor, shutdown).await;
    Ok(())
}

/// First SIGINT/SIGTERM cancels `shutdown` for a graceful stop; a second
/// one forces an immediate exit in case something is stuck draining.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                tracing::info!("received SIGTERM");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                tracing::info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                tracing::info!("received signal again, forcing exit");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                tracing::info!("received signal again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
