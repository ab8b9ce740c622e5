// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration, loaded from a YAML file at startup.

use std::path::PathBuf;

use indexmap::IndexMap;
use lgproto::{AgentDetails, CommandSpec};
use serde::Deserialize;

/// Command-line entrypoint: `lgagent --config lgagent.yaml`.
#[derive(Debug, Clone, clap::Parser)]
pub struct Cli {
    /// Path to the agent's YAML configuration file.
    #[arg(long, env = "LG_AGENT_CONFIG")]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub server: ServerSection,
    pub agent: AgentSection,
    /// Ordered map of command name → spec. Order is significant: it
    /// determines the order surfaced in the handshake's `commands[]` list
    /// and, downstream, the UI — hence `IndexMap` rather than `HashMap`.
    pub commands: IndexMap<String, CommandEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub details: AgentDetails,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandEntry {
    pub template: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ignore_target: bool,
}

impl AgentConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        if config.commands.is_empty() {
            anyhow::bail!("agent config has no whitelisted commands");
        }
        Ok(config)
    }

    pub fn server_url(&self) -> String {
        let scheme = if self.server.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/ws/agent", self.server.host, self.server.port)
    }

    /// The ordered `commands[]` list as sent in the `handshake` frame.
    pub fn command_specs(&self) -> Vec<CommandSpec> {
        self.commands
            .iter()
            .map(|(name, entry)| CommandSpec {
                name: name.clone(),
                template: entry.template.clone(),
                description: entry.description.clone(),
                ignore_target: entry.ignore_target,
            })
            .collect()
    }
}
