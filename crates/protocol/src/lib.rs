// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol shared between the Looking Glass server and its agents.
//!
//! Two framed message vocabularies travel over the agent WebSocket
//! (`AgentFrame` agent→server, `ServerFrame` server→agent), plus a third,
//! unrelated `SseEvent` vocabulary the server emits to browsers over the
//! `/api/exec` SSE stream. None of the three are interchangeable — an
//! `SseEvent` never appears on the agent socket and vice versa.

use serde::{Deserialize, Serialize};

/// A command's target resolution mode, as requested by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    Auto,
    Ipv4,
    Ipv6,
}

impl Default for IpVersion {
    fn default() -> Self {
        Self::Auto
    }
}

/// How a `command_output` frame's `output` field should be applied to the
/// consumer's visible buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Append to the existing buffer.
    Append,
    /// Overwrite the existing buffer with the full current snapshot.
    Replace,
}

/// Free-form descriptive fields for an agent, surfaced to the UI verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDetails {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub test_ip: String,
    #[serde(default)]
    pub description: String,
}

/// A single whitelisted command an agent is willing to execute.
///
/// `template` is a trusted argv-or-shell fragment from the agent's own
/// config; it is never derived from browser input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ignore_target: bool,
}

// -- Agent -> Server ----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    Handshake {
        name: String,
        #[serde(default)]
        group: String,
        #[serde(default)]
        details: AgentDetails,
        commands: Vec<CommandSpec>,
    },
    CommandOutput {
        command_id: String,
        output: String,
        #[serde(default)]
        error: Option<String>,
        is_complete: bool,
        #[serde(default)]
        is_error: bool,
        output_mode: OutputMode,
    },
}

// -- Server -> Agent ----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    HandshakeAck {
        message: String,
    },
    ExecuteCommand {
        command_id: String,
        command_name: String,
        target: String,
        ip_version: IpVersion,
    },
    StopCommand {
        command_id: String,
    },
}

// -- Server -> Browser (SSE) ---------------------------------------------------

/// Event shape streamed to the browser from `POST /api/exec`.
///
/// Unlike `AgentFrame`/`ServerFrame` this is serialized as the SSE `data:`
/// payload, not as a WebSocket text frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    Output {
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stopped: Option<bool>,
    },
    Error {
        output: String,
    },
    Complete {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        stopped: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Build the correlation key for an inflight command per the wire contract:
/// `<command>-<target>-<agent>-<session>`. Chosen so clients can reconstruct
/// the key locally (used by `POST /api/stop`) without a server round-trip.
pub fn command_id(command: &str, target: &str, agent: &str, session: &str) -> String {
    format!("{command}-{target}-{agent}-{session}")
}
