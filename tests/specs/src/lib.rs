// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `lgserver` and `lgagent` binaries as subprocesses and
//! exercises them over plain HTTP, the same way a browser and an agent
//! would in production.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Build the correlation key the same way `lgproto::command_id` does, so
/// tests can construct a `POST /api/stop` body without linking the wire
/// protocol crate into a process-level harness.
pub fn command_id(command: &str, target: &str, agent: &str, session: &str) -> String {
    format!("{command}-{target}-{agent}-{session}")
}

fn workspace_binary(name: &str) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join(name)
}

/// Find a free TCP port by binding to :0 then releasing it.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `lgserver` process, killed on drop.
pub struct LgServerProcess {
    child: Child,
    port: u16,
    client: reqwest::Client,
    _config_dir: tempfile::TempDir,
}

impl LgServerProcess {
    /// Start `lgserver` with a minimal config: no TLS, a 5s keepalive, and
    /// rate limiting disabled unless `rate_limit_max` is given.
    pub async fn start(password: &str, rate_limit_max: Option<u32>) -> anyhow::Result<Self> {
        let port = free_port()?;
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("lgserver.yaml");
        let rate_limit_enabled = rate_limit_max.is_some();
        let max_commands = rate_limit_max.unwrap_or(100);
        std::fs::write(
            &config_path,
            format!(
                "server:\n  host: 127.0.0.1\n  port: {port}\n  password: {password}\n  log_level: warn\n\
                 websocket:\n  ping_interval: 30\n  pong_wait: 10\n\
                 connection:\n  keepalive: 5\n\
                 rate_limit:\n  enabled: {rate_limit_enabled}\n  max_commands: {max_commands}\n  time_window: 10\n"
            ),
        )?;

        let binary = workspace_binary("lgserver");
        anyhow::ensure!(binary.exists(), "lgserver binary not found at {}", binary.display());

        let child = Command::new(&binary)
            .arg("--config")
            .arg(&config_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let process =
            Self { child, port, client: reqwest::Client::new(), _config_dir: dir };
        process.wait_healthy(Duration::from_secs(5)).await?;
        Ok(process)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let url = format!("{}/api/session", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("lgserver did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = self.client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Issue a fresh session id.
    pub async fn session(&self) -> anyhow::Result<String> {
        let resp: serde_json::Value =
            self.client.get(format!("{}/api/session", self.base_url())).send().await?.json().await?;
        resp["session_id"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("missing session_id in response"))
    }

    async fn node_agent_state(&self, session_id: &str, agent_name: &str) -> anyhow::Result<Option<String>> {
        let resp: serde_json::Value = self
            .client
            .get(format!("{}/api/node", self.base_url()))
            .query(&[("session_id", session_id)])
            .send()
            .await?
            .json()
            .await?;
        let state = resp["groups"]
            .as_array()
            .into_iter()
            .flatten()
            .flat_map(|g| g["agents"].as_array().cloned().unwrap_or_default())
            .find(|a| a["name"] == agent_name)
            .and_then(|a| a["state"].as_str().map(str::to_owned));
        Ok(state)
    }

    async fn wait_for_state(
        &self,
        session_id: &str,
        agent_name: &str,
        expected: &str,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("agent {agent_name} never reached state {expected} within {timeout:?}");
            }
            if self.node_agent_state(session_id, agent_name).await?.as_deref() == Some(expected) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn wait_agent_connected(
        &self,
        session_id: &str,
        agent_name: &str,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        self.wait_for_state(session_id, agent_name, "connected", timeout).await
    }

    pub async fn wait_agent_disconnected(
        &self,
        session_id: &str,
        agent_name: &str,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        self.wait_for_state(session_id, agent_name, "disconnected", timeout).await
    }

    /// Run `POST /api/exec`, returning the raw SSE body once the stream
    /// completes. The stream is always finite — it ends with a `complete`
    /// event — so reading it to completion never hangs even though the
    /// response declares `Connection: keep-alive`.
    pub async fn exec(&self, session_id: &str, agent: &str, command: &str, target: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/api/exec", self.base_url()))
            .query(&[("session_id", session_id)])
            .json(&serde_json::json!({"agent": agent, "command": command, "target": target}))
            .send()
            .await?;
        Ok(resp.text().await?)
    }

    pub async fn stop(&self, session_id: &str, command_id: &str) -> anyhow::Result<reqwest::StatusCode> {
        let resp = self
            .client
            .post(format!("{}/api/stop", self.base_url()))
            .query(&[("session_id", session_id)])
            .json(&serde_json::json!({"command_id": command_id}))
            .send()
            .await?;
        Ok(resp.status())
    }
}

impl Drop for LgServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A running `lgagent` process, killed on drop.
pub struct LgAgentProcess {
    child: Child,
    _config_dir: tempfile::TempDir,
}

impl LgAgentProcess {
    /// Start `lgagent` against `server`, whitelisting the commands given in
    /// `commands_yaml` (pre-indented YAML mapping body under `commands:`).
    pub fn start(
        server: &LgServerProcess,
        password: &str,
        name: &str,
        commands_yaml: &str,
    ) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("lgagent.yaml");
        std::fs::write(
            &config_path,
            format!(
                "server:\n  host: 127.0.0.1\n  port: {}\n  password: {password}\n  tls: false\n\
                 agent:\n  name: {name}\n  group: test\n  log_level: warn\n\
                 commands:\n{commands_yaml}",
                server.port(),
            ),
        )?;

        let binary = workspace_binary("lgagent");
        anyhow::ensure!(binary.exists(), "lgagent binary not found at {}", binary.display());

        let child = Command::new(&binary)
            .arg("--config")
            .arg(&config_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, _config_dir: dir })
    }
}

impl Drop for LgAgentProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
