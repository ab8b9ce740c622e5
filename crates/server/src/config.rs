// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server configuration, loaded from a YAML file at startup.
//!
//! The file path is the only CLI-level knob (`--config`); everything else
//! lives in the YAML document, matching spec.md §6's external-config
//! contract.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Command-line entrypoint: `lgserver --config lgserver.yaml`.
#[derive(Debug, Clone, clap::Parser)]
pub struct Cli {
    /// Path to the server's YAML configuration file.
    #[arg(long, env = "LG_SERVER_CONFIG")]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub websocket: WebsocketSection,
    pub connection: ConnectionSection,
    pub rate_limit: RateLimitSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub tls_cert_file: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebsocketSection {
    pub ping_interval: u64,
    pub pong_wait: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSection {
    /// Seconds an agent may remain disconnected before the reaper deletes
    /// its record. `0` disables the reaper.
    pub keepalive: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub max_commands: u32,
    pub time_window: u64,
}

impl ServerConfig {
    /// Load and validate a config file. TLS material is checked for
    /// existence (not parsed — TLS termination is handled by a front
    /// proxy; see SPEC_FULL.md §C11), matching spec.md §6's exit-code
    /// contract: a missing required file is a startup failure.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server.tls {
            let cert = self
                .server
                .tls_cert_file
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("server.tls is true but tls_cert_file is unset"))?;
            let key = self
                .server
                .tls_key_file
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("server.tls is true but tls_key_file is unset"))?;
            if !cert.exists() {
                anyhow::bail!("tls_cert_file does not exist: {}", cert.display());
            }
            if !key.exists() {
                anyhow::bail!("tls_key_file does not exist: {}", key.display());
            }
            tracing::warn!(
                "TLS material validated but not terminated by this process; \
                 run behind a TLS-terminating proxy"
            );
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.websocket.ping_interval)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.websocket.pong_wait)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.connection.keepalive)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.time_window)
    }

    /// The reaper's own tick interval: `max(1 minute, keepalive)`, per
    /// spec.md §4.10.
    pub fn reap_interval(&self) -> Duration {
        self.keepalive().max(Duration::from_secs(60))
    }
}
