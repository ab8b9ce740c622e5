// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/ws/agent`: the agent-facing half of the transport (C3).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use lgproto::{AgentFrame, ServerFrame};
use tokio::sync::mpsc;

use crate::router::RoutedOutput;
use crate::AppState;

pub async fn agent_ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let provided = headers.get("x-agent-password").and_then(|v| v.to_str().ok()).unwrap_or("");
    if !constant_time_eq(provided.as_bytes(), state.config.server.password.as_bytes()) {
        tracing::warn!("agent websocket auth failure");
        return (StatusCode::UNAUTHORIZED, "invalid agent password").into_response();
    }

    ws.on_upgrade(move |socket| handle_agent_socket(socket, state))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

async fn handle_agent_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    let Some((name, mut writer_rx)) = read_handshake(&mut sink, &mut stream, &state).await else {
        return;
    };

    // The writer side lives on its own task so concurrent `execute_command`
    // (C7) and `stop_command` (C5) sends are serialized by the channel's
    // single consumer — the equivalent of the per-channel write mutex
    // described in spec.md §4.3.
    let ping_interval = state.config.ping_interval();
    let writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        loop {
            tokio::select! {
                frame = writer_rx.recv() => {
                    match frame {
                        Some(frame) if send_frame(&mut sink, &frame).await.is_ok() => {}
                        _ => break,
                    }
                }
                _ = ticker.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let pong_wait = state.config.pong_wait();
    loop {
        match tokio::time::timeout(pong_wait, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if !dispatch_agent_frame(&state, &text).await {
                    tracing::warn!(agent = %name, "malformed agent frame, closing connection");
                    break;
                }
            }
            Ok(Some(Ok(Message::Pong(_) | Message::Ping(_) | Message::Binary(_)))) => {}
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::warn!(agent = %name, err = %e, "agent websocket read error");
                break;
            }
            Err(_) => {
                tracing::warn!(agent = %name, "agent pong timeout, marking disconnected");
                break;
            }
        }
    }

    writer.abort();
    state.registry.mark_disconnected(&name).await;
}

/// Reads and validates the mandatory first `handshake` frame and registers
/// the agent. Returns the agent name plus the receive half of its writer
/// channel on success.
async fn read_handshake(
    sink: &mut SplitSink<WebSocket, Message>,
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    state: &Arc<AppState>,
) -> Option<(String, mpsc::UnboundedReceiver<ServerFrame>)> {
    let Some(Ok(Message::Text(text))) = stream.next().await else {
        tracing::warn!("agent connection closed before sending a handshake");
        return None;
    };

    let Ok(AgentFrame::Handshake { name, group, details, commands }) =
        serde_json::from_str::<AgentFrame>(&text)
    else {
        tracing::warn!("first agent frame was not a handshake, closing connection");
        return None;
    };

    let (tx, rx) = mpsc::unbounded_channel();
    state.registry.register(&name, group, details, commands, tx).await;

    let ack = ServerFrame::HandshakeAck { message: format!("welcome, {name}") };
    if send_frame(sink, &ack).await.is_err() {
        state.registry.mark_disconnected(&name).await;
        return None;
    }

    Some((name, rx))
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    sink.send(Message::Text(text.into())).await
}

async fn dispatch_agent_frame(state: &Arc<AppState>, text: &str) -> bool {
    let Ok(frame) = serde_json::from_str::<AgentFrame>(text) else {
        return false;
    };
    if let AgentFrame::CommandOutput { command_id, output, error, is_complete, is_error, .. } = frame
    {
        state
            .router
            .dispatch(&command_id, RoutedOutput { output, error, is_complete, is_error })
            .await;
    }
    true
}
