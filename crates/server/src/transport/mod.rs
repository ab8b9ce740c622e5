// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the Looking Glass server.

pub mod agent_ws;
pub mod http;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::AppState;

/// Build the axum `Router` with every route from spec.md §6's wire
/// endpoints. No auth middleware layer is needed at the router level: the
/// agent plane authenticates in `agent_ws::agent_ws_handler` itself (a
/// per-header check, not a blanket layer, since only that one route is
/// password-gated) and the browser plane has no authenticated end users
/// per spec.md §1's non-goals.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/agent", get(agent_ws::agent_ws_handler))
        .route("/api/session", get(http::get_session))
        .route("/api/node", get(http::get_node))
        .route("/api/exec", post(http::post_exec))
        .route("/api/stop", post(http::post_stop))
        .fallback(http::spa_fallback)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
