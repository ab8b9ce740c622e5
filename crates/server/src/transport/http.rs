// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers: session issuance (C6), node listing and stop (C8), and
//! the exec SSE endpoint (C7).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Query, State};
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::Stream;
use lgproto::{CommandSpec, IpVersion, ServerFrame, SseEvent};
use serde::{Deserialize, Serialize};

use crate::error::LgError;
use crate::registry::AgentState;
use crate::session::{self, RateLimitDecision};
use crate::validate::{self, ValidatedTarget};
use crate::AppState;

/// How often the exec loop re-checks the agent's registry state while
/// waiting for output, to detect a mid-command transport loss that leaves
/// the sink silent (spec.md §7's "agent transport loss mid-command" row).
const DISCONNECT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct SessionIdQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
}

/// `GET /api/session`
pub async fn get_session() -> impl IntoResponse {
    Json(SessionResponse { session_id: session::issue_session() })
}

#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub version: String,
    pub total_nodes: usize,
    pub online_nodes: usize,
    pub offline_nodes: usize,
    pub groups: Vec<NodeGroup>,
}

#[derive(Debug, Serialize)]
pub struct NodeGroup {
    pub name: String,
    pub agents: Vec<NodeAgent>,
}

#[derive(Debug, Serialize)]
pub struct NodeAgent {
    pub name: String,
    pub group: String,
    pub state: AgentState,
    pub details: lgproto::AgentDetails,
    pub commands: Vec<CommandSpec>,
}

/// `GET /api/node?session_id=…`
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionIdQuery>,
) -> axum::response::Response {
    if !session::validate_session(&query.session_id) {
        return LgError::Unauthorized.to_http_response("invalid session").into_response();
    }

    let stats = state.registry.stats().await;
    let groups = state
        .registry
        .grouped_snapshot()
        .await
        .into_iter()
        .map(|(name, agents)| NodeGroup {
            name,
            agents: agents
                .into_iter()
                .map(|a| NodeAgent {
                    name: a.name.clone(),
                    group: a.group.clone(),
                    state: a.state,
                    details: a.details.clone(),
                    commands: a.commands.clone(),
                })
                .collect(),
        })
        .collect();

    let body = NodeResponse {
        version: env!("CARGO_PKG_VERSION").to_owned(),
        total_nodes: stats.total,
        online_nodes: stats.online,
        offline_nodes: stats.offline,
        groups,
    };
    let mut response = Json(body).into_response();
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub agent: String,
    pub command: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub ip_version: IpVersion,
}

/// `POST /api/exec?session_id=…` — see spec.md §4.7.
pub async fn post_exec(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionIdQuery>,
    Json(req): Json<ExecRequest>,
) -> axum::response::Response {
    if !session::validate_session(&query.session_id) {
        return LgError::Unauthorized.to_http_response("invalid session").into_response();
    }

    let stream = exec_stream(state, query.session_id, req);
    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

fn sse(payload: &SseEvent) -> Result<Event, Infallible> {
    let body = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_owned());
    Ok(Event::default().data(body))
}

fn complete(success: bool, error: Option<String>) -> Result<Event, Infallible> {
    sse(&SseEvent::Complete { success, stopped: None, error })
}

fn stopped_complete() -> Result<Event, Infallible> {
    sse(&SseEvent::Complete { success: false, stopped: Some(true), error: None })
}

/// Guards against an exec stream being dropped mid-command (client
/// disconnect, proxy timeout) without ever reaching a terminal branch: on
/// drop it spawns a detached task that runs the same stop path `POST
/// /api/stop` would, so the agent is told to stop even though nobody is
/// left to read the SSE body.
struct ExecGuard {
    state: Arc<AppState>,
    command_id: String,
    done: bool,
}

impl Drop for ExecGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let state = Arc::clone(&self.state);
        let command_id = self.command_id.clone();
        tokio::spawn(async move {
            state.router.trigger_stop(&command_id).await;
        });
    }
}

fn exec_stream(
    state: Arc<AppState>,
    session_id: String,
    req: ExecRequest,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream! {
        if state.config.rate_limit.enabled {
            if let RateLimitDecision::Denied { retry_after } = state.rate_limiter.check(&session_id).await {
                yield complete(false, Some(format!(
                    "rate limited, retry after {}s", retry_after.as_secs()
                )));
                return;
            }
        }

        let Some(record) = state.registry.lookup(&req.agent).await else {
            yield complete(false, Some("Agent not found".to_owned()));
            return;
        };
        if record.state != AgentState::Connected {
            yield complete(false, Some("Agent is not connected".to_owned()));
            return;
        }
        let Some(command) = record.command(&req.command).cloned() else {
            yield complete(false, Some("Invalid command".to_owned()));
            return;
        };
        let Some(conn) = record.conn.clone() else {
            yield complete(false, Some("Agent is not connected".to_owned()));
            return;
        };

        let target = if command.ignore_target {
            String::new()
        } else {
            match validate::validate_input(&req.target) {
                ValidatedTarget::Invalid => {
                    yield complete(false, Some("Invalid target".to_owned()));
                    return;
                }
                ValidatedTarget::Ip | ValidatedTarget::Domain => req.target.trim().to_owned(),
            }
        };

        let command_id = lgproto::command_id(&req.command, &target, &req.agent, &session_id);
        let Some((mut rx, stop)) = state.router.try_open_sink(&command_id, conn.clone()).await else {
            yield complete(false, Some("Command already in progress".to_owned()));
            return;
        };

        if conn
            .send(ServerFrame::ExecuteCommand {
                command_id: command_id.clone(),
                command_name: req.command.clone(),
                target: target.clone(),
                ip_version: req.ip_version,
            })
            .is_err()
        {
            state.router.close_sink(&command_id).await;
            yield complete(false, Some("Agent is not connected".to_owned()));
            return;
        }

        let mut guard = ExecGuard { state: Arc::clone(&state), command_id: command_id.clone(), done: false };
        let mut poll = tokio::time::interval(DISCONNECT_POLL_INTERVAL);

        loop {
            // Biased so an already-cancelled `stop` always wins over a
            // simultaneously-ready `rx.recv()` — `trigger_stop` removes the
            // sink (closing `rx`) and cancels `stop` back to back with no
            // `.await` between them, so both arms can be ready on the same
            // poll; without a fixed priority the Stopped output could be
            // skipped in favor of the bare close-sink completion.
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    yield sse(&SseEvent::Output { output: "\n*** Stopped ***".to_owned(), stopped: Some(true) });
                    yield stopped_complete();
                    guard.done = true;
                    return;
                }
                frame = rx.recv() => {
                    match frame {
                        Some(output) if output.is_complete => {
                            yield complete(!output.is_error, output.error);
                            state.router.close_sink(&command_id).await;
                            guard.done = true;
                            return;
                        }
                        Some(output) if output.is_error => {
                            yield sse(&SseEvent::Error { output: output.output });
                        }
                        Some(output) => {
                            yield sse(&SseEvent::Output { output: output.output, stopped: None });
                        }
                        None => {
                            yield stopped_complete();
                            guard.done = true;
                            return;
                        }
                    }
                }
                _ = poll.tick() => {
                    let still_connected = state
                        .registry
                        .lookup(&req.agent)
                        .await
                        .is_some_and(|r| r.state == AgentState::Connected);
                    if !still_connected {
                        yield complete(false, Some("agent disconnected".to_owned()));
                        state.router.close_sink(&command_id).await;
                        guard.done = true;
                        return;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub command_id: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /api/stop?session_id=…`
pub async fn post_stop(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionIdQuery>,
    Json(req): Json<StopRequest>,
) -> axum::response::Response {
    if !session::validate_session(&query.session_id) {
        return LgError::Unauthorized.to_http_response("invalid session").into_response();
    }

    if state.router.trigger_stop(&req.command_id).await {
        Json(StopResponse { success: true, message: Some("stopped".to_owned()), error: None })
            .into_response()
    } else {
        LgError::NotFound.to_http_response("command not found").into_response()
    }
}

/// Static UI serving is an external collaborator per spec.md §1; this
/// fallback only exists so the documented `GET /` / arbitrary-path wire
/// endpoint resolves to something rather than axum's default 404.
pub async fn spa_fallback() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        "<!doctype html><title>Looking Glass</title>",
    )
}
