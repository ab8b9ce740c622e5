// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Looking Glass server: agent fabric and command dispatch plane.

pub mod config;
pub mod error;
pub mod reaper;
pub mod registry;
pub mod router;
pub mod session;
pub mod transport;
pub mod validate;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::registry::AgentRegistry;
use crate::router::CommandRouter;
use crate::session::RateLimiter;
use crate::transport::build_router;

pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<AgentRegistry>,
    pub router: CommandRouter,
    pub rate_limiter: RateLimiter,
}

/// Run the server until shutdown (SIGINT/SIGTERM).
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown = CancellationToken::new();

    let registry = Arc::new(AgentRegistry::new());
    let rate_limiter = RateLimiter::new(config.rate_limit.max_commands, config.rate_limit_window());
    let keep_alive = config.keepalive();
    let reap_interval = config.reap_interval();

    reaper::spawn(Arc::clone(&registry), keep_alive, reap_interval, shutdown.clone());

    let state = Arc::new(AppState {
        config: config.clone(),
        registry,
        router: CommandRouter::new(),
        rate_limiter,
    });

    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("lgserver listening on {addr}");

    spawn_signal_handler(shutdown.clone());

    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
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
