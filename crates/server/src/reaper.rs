// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline reaper (C10): periodic cleanup of agents disconnected beyond a
//! grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::registry::AgentRegistry;

/// Spawns the reaper loop. Disabled entirely when `keep_alive == 0`, per
/// spec.md §4.10. The tick interval is `max(1 minute, keep_alive)`
/// (`ServerConfig::reap_interval`).
pub fn spawn(
    registry: Arc<AgentRegistry>,
    keep_alive: Duration,
    tick: Duration,
    shutdown: CancellationToken,
) {
    if keep_alive.is_zero() {
        tracing::info!("offline reaper disabled (connection.keepalive == 0)");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let reaped = registry.reap_offline_older_than(keep_alive).await;
                    if reaped > 0 {
                        tracing::info!(reaped, "offline reaper removed stale agent records");
                    }
                }
            }
        }
    });
}
