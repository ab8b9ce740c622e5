// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thread-safe agent registry (C4): name → record, grouping, stats, reaping.
//!
//! Mutating operations replace the whole `Arc<AgentRecord>` for a name under
//! the map's write lock rather than mutating fields in place, so a reader
//! that has already cloned an `Arc` out of the map never observes a torn
//! record.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use lgproto::{AgentDetails, CommandSpec, ServerFrame};
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Connecting,
    Connected,
    Disconnected,
}

/// The channel used to push frames to an agent's WebSocket write side.
///
/// The writer task owned by `transport::agent_ws` is the channel's sole
/// consumer, which serializes concurrent `execute_command`/`stop_command`
/// sends the same way a write mutex would.
pub type AgentChannel = mpsc::UnboundedSender<ServerFrame>;

#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub name: String,
    pub group: String,
    pub details: AgentDetails,
    pub commands: Vec<CommandSpec>,
    pub state: AgentState,
    pub first_seen: SystemTime,
    pub last_connected: SystemTime,
    pub conn: Option<AgentChannel>,
}

impl AgentRecord {
    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentRecord>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a handshake. Preserves `first_seen` across re-handshakes; if a
    /// `Connected` record with this name already exists, its channel is
    /// replaced silently (see DESIGN.md's open-question note) and a
    /// `first_seen`-preserving record takes its place.
    pub async fn register(
        &self,
        name: &str,
        group: String,
        details: AgentDetails,
        commands: Vec<CommandSpec>,
        conn: AgentChannel,
    ) -> bool {
        let now = SystemTime::now();
        let mut agents = self.agents.write().await;
        let existing = agents.get(name);
        if matches!(existing.map(|r| r.state), Some(AgentState::Connected)) {
            tracing::info!(agent = name, "replacing channel for already-connected agent");
        }
        let first_seen = existing.map_or(now, |r| r.first_seen);
        let replaced = existing.is_some();
        let record = AgentRecord {
            name: name.to_owned(),
            group,
            details,
            commands,
            state: AgentState::Connected,
            first_seen,
            last_connected: now,
            conn: Some(conn),
        };
        agents.insert(name.to_owned(), Arc::new(record));
        replaced
    }

    pub async fn mark_disconnected(&self, name: &str) {
        let mut agents = self.agents.write().await;
        let Some(existing) = agents.get(name) else { return };
        if existing.state == AgentState::Disconnected {
            return;
        }
        let mut updated = (**existing).clone();
        updated.state = AgentState::Disconnected;
        updated.last_connected = SystemTime::now();
        updated.conn = None;
        agents.insert(name.to_owned(), Arc::new(updated));
    }

    pub async fn lookup(&self, name: &str) -> Option<Arc<AgentRecord>> {
        self.agents.read().await.get(name).cloned()
    }

    /// Consistent, name-sorted snapshot of every known agent.
    pub async fn snapshot(&self) -> Vec<Arc<AgentRecord>> {
        let agents = self.agents.read().await;
        let mut list: Vec<_> = agents.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn stats(&self) -> RegistryStats {
        let agents = self.agents.read().await;
        let total = agents.len();
        let online = agents.values().filter(|r| r.state == AgentState::Connected).count();
        RegistryStats { total, online, offline: total - online }
    }

    /// `snapshot()` partitioned by group (defaulting to `"Default"`), with
    /// group names sorted.
    pub async fn grouped_snapshot(&self) -> Vec<(String, Vec<Arc<AgentRecord>>)> {
        let mut groups: BTreeMap<String, Vec<Arc<AgentRecord>>> = BTreeMap::new();
        for agent in self.snapshot().await {
            let key = if agent.group.is_empty() { "Default".to_owned() } else { agent.group.clone() };
            groups.entry(key).or_default().push(agent);
        }
        groups.into_iter().collect()
    }

    /// Deletes every `Disconnected` record whose `last_connected` predates
    /// `now - keep_alive`. Returns the number of records removed.
    pub async fn reap_offline_older_than(&self, keep_alive: Duration) -> usize {
        let cutoff = SystemTime::now().checked_sub(keep_alive).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut agents = self.agents.write().await;
        let doomed: Vec<String> = agents
            .values()
            .filter(|r| r.state == AgentState::Disconnected && r.last_connected < cutoff)
            .map(|r| r.name.clone())
            .collect();
        for name in &doomed {
            agents.remove(name);
        }
        doomed.len()
    }
}
