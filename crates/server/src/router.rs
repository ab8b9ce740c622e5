// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command router (C5): correlates `command_id` to an output sink and
//! forwards stop signals to the owning agent's channel.

use std::collections::HashMap;
use std::time::Duration;

use lgproto::ServerFrame;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::registry::AgentChannel;

/// A `command_output` frame forwarded from the agent plane to an exec
/// handler, already stripped of its `command_id` (the sink itself is the
/// correlation).
#[derive(Debug, Clone)]
pub struct RoutedOutput {
    pub output: String,
    pub error: Option<String>,
    pub is_complete: bool,
    pub is_error: bool,
}

/// Sink capacity and full-queue drop timeout. Tuning surface, not wired to
/// config — spec.md §6 does not list either under the YAML schema.
const SINK_CAPACITY: usize = 1000;
const SINK_SEND_TIMEOUT: Duration = Duration::from_secs(5);

struct OutputSink {
    tx: mpsc::Sender<RoutedOutput>,
    conn: AgentChannel,
    stop: CancellationToken,
}

#[derive(Default)]
pub struct CommandRouter {
    sinks: Mutex<HashMap<String, OutputSink>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_active(&self, command_id: &str) -> bool {
        self.sinks.lock().await.contains_key(command_id)
    }

    /// Atomically checks that `command_id` has no active sink and, if so,
    /// registers a fresh one on the given agent channel, returning the
    /// receive half plus a token POST /stop can cancel. Returns `None` if a
    /// sink for `command_id` is already open — a single lock acquisition
    /// for the check-and-reserve so two concurrent execs for the same
    /// command/target/agent/session can't both win.
    pub async fn try_open_sink(
        &self,
        command_id: &str,
        conn: AgentChannel,
    ) -> Option<(mpsc::Receiver<RoutedOutput>, CancellationToken)> {
        let mut sinks = self.sinks.lock().await;
        if sinks.contains_key(command_id) {
            return None;
        }
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let stop = CancellationToken::new();
        sinks.insert(command_id.to_owned(), OutputSink { tx, conn, stop: stop.clone() });
        Some((rx, stop))
    }

    /// Forwards an agent frame to its sink. Non-blocking first; falls back
    /// to a 5s timed send on a full queue; logs and drops if still full —
    /// the agent read loop must never block indefinitely.
    pub async fn dispatch(&self, command_id: &str, output: RoutedOutput) {
        let sinks = self.sinks.lock().await;
        let Some(sink) = sinks.get(command_id) else {
            // Late frame after close, or a completion/stop race: discard.
            return;
        };
        match sink.tx.try_send(output.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let tx = sink.tx.clone();
                drop(sinks);
                if tokio::time::timeout(SINK_SEND_TIMEOUT, tx.send(output)).await.is_err() {
                    tracing::warn!(command_id, "sink full after timeout, dropping frame");
                }
            }
        }
    }

    /// Removes the sink for `command_id` without notifying the agent.
    /// Further `dispatch` calls for it are silently discarded.
    pub async fn close_sink(&self, command_id: &str) {
        self.sinks.lock().await.remove(command_id);
    }

    /// The external-stop path (C8's `POST /api/stop`): sends `stop_command`
    /// on the owning agent's channel, cancels the sink's stop token (which
    /// the exec handler is watching), and removes the sink. Returns `false`
    /// if `command_id` has no active sink (already completed or unknown).
    pub async fn trigger_stop(&self, command_id: &str) -> bool {
        let Some(sink) = self.sinks.lock().await.remove(command_id) else {
            return false;
        };
        let _ = sink.conn.send(ServerFrame::StopCommand { command_id: command_id.to_owned() });
        sink.stop.cancel();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_channel() -> AgentChannel {
        mpsc::unbounded_channel().0
    }

    #[tokio::test]
    async fn dispatch_before_open_is_silently_dropped() {
        let router = CommandRouter::new();
        router
            .dispatch(
                "missing",
                RoutedOutput { output: String::new(), error: None, is_complete: false, is_error: false },
            )
            .await;
        assert!(!router.is_active("missing").await);
    }

    #[tokio::test]
    async fn open_then_dispatch_then_close_round_trips() -> Result<(), String> {
        let router = CommandRouter::new();
        let (mut rx, _stop) = router
            .try_open_sink("cmd-1", agent_channel())
            .await
            .ok_or("expected sink to open")?;
        assert!(router.is_active("cmd-1").await);

        router
            .dispatch(
                "cmd-1",
                RoutedOutput {
                    output: "64 bytes".to_owned(),
                    error: None,
                    is_complete: false,
                    is_error: false,
                },
            )
            .await;
        let received = rx.recv().await.ok_or("expected a routed frame")?;
        assert_eq!(received.output, "64 bytes");

        router.close_sink("cmd-1").await;
        assert!(!router.is_active("cmd-1").await);

        router
            .dispatch(
                "cmd-1",
                RoutedOutput { output: "late".to_owned(), error: None, is_complete: false, is_error: false },
            )
            .await;
        assert!(rx.recv().await.is_none(), "closed sink must not accept further frames");
        Ok(())
    }

    #[tokio::test]
    async fn trigger_stop_sends_stop_command_and_cancels_token() -> Result<(), String> {
        let (tx, mut agent_rx) = mpsc::unbounded_channel();
        let router = CommandRouter::new();
        let (_rx, stop) = router
            .try_open_sink("cmd-1", tx)
            .await
            .ok_or("expected sink to open")?;

        assert!(router.trigger_stop("cmd-1").await);
        assert!(stop.is_cancelled());
        assert!(!router.is_active("cmd-1").await);

        let frame = agent_rx.recv().await.ok_or("expected a stop_command frame")?;
        match frame {
            ServerFrame::StopCommand { command_id } => assert_eq!(command_id, "cmd-1"),
            _ => return Err("expected StopCommand".to_owned()),
        }
        Ok(())
    }

    #[tokio::test]
    async fn trigger_stop_on_unknown_id_returns_false() {
        let router = CommandRouter::new();
        assert!(!router.trigger_stop("nope").await);
    }

    #[tokio::test]
    async fn try_open_sink_rejects_a_second_reservation_for_the_same_id() {
        let router = CommandRouter::new();
        let first = router.try_open_sink("cmd-1", agent_channel()).await;
        assert!(first.is_some());

        let second = router.try_open_sink("cmd-1", agent_channel()).await;
        assert!(second.is_none(), "a command_id already reserved must not open a second sink");
    }
}
