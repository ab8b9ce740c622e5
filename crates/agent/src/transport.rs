// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound WebSocket client: dials the server, performs the handshake,
//! and pumps frames to/from the executor. Reconnects with exponential
//! backoff on any connection loss.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use lgproto::{AgentFrame, ServerFrame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::executor::Executor;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

type Sink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connects to the server and serves frames until shutdown or connection
/// loss, reconnecting with exponential backoff in between.
pub async fn run(config: Arc<AgentConfig>, executor: Arc<Executor>, shutdown: CancellationToken) {
    let mut backoff = INITIAL_BACKOFF;

    while !shutdown.is_cancelled() {
        match connect_and_serve(&config, &executor, shutdown.clone()).await {
            Ok(()) => backoff = INITIAL_BACKOFF,
            Err(e) => {
                tracing::warn!(error = %e, backoff_ms = backoff.as_millis(), "lost connection to server, reconnecting");
            }
        }

        if shutdown.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = next_backoff(backoff, MAX_BACKOFF);
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

async fn connect_and_serve(
    config: &AgentConfig,
    executor: &Arc<Executor>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let url = config.server_url();
    let mut request = url.clone().into_client_request()?;
    request
        .headers_mut()
        .insert("X-Agent-Password", HeaderValue::from_str(&config.server.password)?);

    let (ws_stream, _) = connect_async(request).await?;
    tracing::info!(%url, "connected to server");
    let (mut write, mut read) = ws_stream.split();

    let handshake = AgentFrame::Handshake {
        name: config.agent.name.clone(),
        group: config.agent.group.clone(),
        details: config.agent.details.clone(),
        commands: config.command_specs(),
    };
    send(&mut write, &handshake).await?;

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<AgentFrame>();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            outgoing = frame_rx.recv() => {
                match outgoing {
                    Some(frame) => send(&mut write, &frame).await?,
                    None => return Ok(()),
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(frame) => handle_server_frame(frame, executor, &frame_tx).await,
                            Err(e) => tracing::warn!(error = %e, "dropping unparseable server frame"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        anyhow::bail!("server closed the connection");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

async fn handle_server_frame(
    frame: ServerFrame,
    executor: &Arc<Executor>,
    frame_tx: &mpsc::UnboundedSender<AgentFrame>,
) {
    match frame {
        ServerFrame::HandshakeAck { message } => {
            tracing::info!(%message, "handshake acknowledged");
        }
        ServerFrame::ExecuteCommand { command_id, command_name, target, .. } => {
            executor.execute(command_id, command_name, target, frame_tx.clone()).await;
        }
        ServerFrame::StopCommand { command_id } => {
            executor.stop(&command_id).await;
        }
    }
}

async fn send(write: &mut Sink, frame: &AgentFrame) -> anyhow::Result<()> {
    let text = serde_json::to_string(frame)?;
    write.send(Message::Text(text.into())).await?;
    Ok(())
}
