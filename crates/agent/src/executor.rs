// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent executor (C2): command admission, process spawn, output
//! accumulation with replace-mode publishing, and stop handling.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use lgproto::{AgentFrame, OutputMode};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, CommandEntry};

const PUBLISH_INTERVAL: Duration = Duration::from_millis(250);
const SHELL_METACHARS: &[char] = &['|', '&', '>', '<', ';'];

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("command not whitelisted: {0}")]
    NotWhitelisted(String),
}

/// Tracks in-flight commands so `stop_command` can signal the right
/// process; the agent never exposes accumulated output or state beyond
/// what it streams to the server.
pub struct Executor {
    config: Arc<AgentConfig>,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl Executor {
    pub fn new(config: Arc<AgentConfig>) -> Arc<Self> {
        Arc::new(Self { config, running: Mutex::new(HashMap::new()) })
    }

    /// Admits and launches `command_name` against `target`, streaming
    /// `command_output` frames over `frame_tx` as the process runs. Returns
    /// immediately; the command itself runs on a spawned task.
    pub async fn execute(
        self: &Arc<Self>,
        command_id: String,
        command_name: String,
        target: String,
        frame_tx: mpsc::UnboundedSender<AgentFrame>,
    ) {
        let entry = match self.admit(&command_name) {
            Ok(entry) => entry,
            Err(e) => {
                send_terminal(&frame_tx, &command_id, e.to_string(), true);
                return;
            }
        };

        let rendered = render(&entry.template, &target, entry.ignore_target);
        let use_shell = rendered.contains(SHELL_METACHARS);

        let stop = CancellationToken::new();
        self.running.lock().await.insert(command_id.clone(), stop.clone());

        let executor = Arc::clone(self);
        tokio::spawn(async move {
            run(Arc::clone(&executor), command_id.clone(), rendered, use_shell, frame_tx, stop).await;
            executor.running.lock().await.remove(&command_id);
        });
    }

    /// Signals a graceful stop; the running task escalates to a forced
    /// kill if the process does not exit in time. A no-op for an unknown
    /// or already-completed `command_id`.
    pub async fn stop(&self, command_id: &str) {
        if let Some(token) = self.running.lock().await.get(command_id) {
            token.cancel();
        }
    }

    fn admit(&self, command_name: &str) -> Result<CommandEntry, ExecutorError> {
        self.config
            .commands
            .get(command_name)
            .cloned()
            .ok_or_else(|| ExecutorError::NotWhitelisted(command_name.to_owned()))
    }
}

/// Appends ` <target>` unless the command ignores its target or the
/// target is empty (spec.md §8's rendering invariant).
fn render(template: &str, target: &str, ignore_target: bool) -> String {
    if ignore_target || target.is_empty() {
        template.to_owned()
    } else {
        format!("{template} {target}")
    }
}

#[derive(Default)]
struct Accumulator {
    stdout: Vec<String>,
    stderr: Vec<String>,
}

impl Accumulator {
    fn render(&self) -> String {
        let mut lines = self.stdout.clone();
        lines.extend(self.stderr.iter().cloned());
        lines.join("\n")
    }
}

#[derive(Clone, Copy)]
enum PipeKind {
    Stdout,
    Stderr,
}

async fn run(
    executor: Arc<Executor>,
    command_id: String,
    rendered: String,
    use_shell: bool,
    frame_tx: mpsc::UnboundedSender<AgentFrame>,
    stop: CancellationToken,
) {
    let _ = &executor; // retained for future admission-aware bookkeeping
    let mut cmd = if use_shell {
        let mut c = TokioCommand::new("/bin/bash");
        c.arg("-c").arg(&rendered);
        c
    } else {
        let mut parts = rendered.split_whitespace();
        let Some(bin) = parts.next() else {
            send_terminal(&frame_tx, &command_id, "empty command template".to_owned(), true);
            return;
        };
        let mut c = TokioCommand::new(bin);
        c.args(parts);
        c
    };
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            send_terminal(&frame_tx, &command_id, format!("failed to spawn: {e}"), true);
            return;
        }
    };

    let pid = child.id();
    if let Some(pid) = pid {
        spawn_stop_escalation(pid, use_shell, stop.clone());
    }

    let accum = Arc::new(Mutex::new(Accumulator::default()));
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(read_pipe(stdout, Arc::clone(&accum), PipeKind::Stdout)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(read_pipe(stderr, Arc::clone(&accum), PipeKind::Stderr)));
    }

    let mut ticker = tokio::time::interval(PUBLISH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            _ = ticker.tick() => {
                publish_replace(&frame_tx, &command_id, &accum).await;
            }
            status = child.wait() => break status,
        }
    };

    for reader in readers {
        let _ = reader.await;
    }

    let rendered_output = accum.lock().await.render();
    let (output, is_error) = match exit {
        Ok(status) if status.success() => (rendered_output, false),
        Ok(status) => (format!("{rendered_output}\n*** process exited with {status} ***"), true),
        Err(e) => (format!("{rendered_output}\n*** wait error: {e} ***"), true),
    };

    let _ = frame_tx.send(AgentFrame::CommandOutput {
        command_id: command_id.clone(),
        output,
        error: None,
        is_complete: false,
        is_error,
        output_mode: OutputMode::Replace,
    });
    let _ = frame_tx.send(AgentFrame::CommandOutput {
        command_id,
        output: String::new(),
        error: None,
        is_complete: true,
        is_error,
        output_mode: OutputMode::Replace,
    });

    // Wake the escalation task so it exits instead of parking on a stop
    // that will never come for a command that already finished.
    stop.cancel();
}

/// Waits for the stop signal, sends SIGINT, then escalates to SIGKILL after
/// 1s (500ms for shell-wrapped commands) if the process is still around.
/// Detached from the run loop so the main select! never busy-polls an
/// already-cancelled token.
fn spawn_stop_escalation(pid: u32, use_shell: bool, stop: CancellationToken) {
    tokio::spawn(async move {
        stop.cancelled().await;
        let pid = Pid::from_raw(pid as i32);
        let _ = kill(pid, Signal::SIGINT);
        let grace = if use_shell { Duration::from_millis(500) } else { Duration::from_secs(1) };
        tokio::time::sleep(grace).await;
        let _ = kill(pid, Signal::SIGKILL);
    });
}

async fn read_pipe(pipe: impl AsyncRead + Unpin, accum: Arc<Mutex<Accumulator>>, kind: PipeKind) {
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => push_line(&accum, kind, line).await,
            Ok(None) => break,
            Err(e) => {
                // Closed-pipe errors are the normal shape of "process exited";
                // anything else is surfaced as a visible accumulator line.
                if !matches!(e.kind(), std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof) {
                    push_line(&accum, kind, format!("[read error: {e}]")).await;
                }
                break;
            }
        }
    }
}

async fn push_line(accum: &Arc<Mutex<Accumulator>>, kind: PipeKind, line: String) {
    let mut accum = accum.lock().await;
    match kind {
        PipeKind::Stdout => accum.stdout.push(line),
        PipeKind::Stderr => accum.stderr.push(line),
    }
}

async fn publish_replace(
    frame_tx: &mpsc::UnboundedSender<AgentFrame>,
    command_id: &str,
    accum: &Arc<Mutex<Accumulator>>,
) {
    let output = accum.lock().await.render();
    let _ = frame_tx.send(AgentFrame::CommandOutput {
        command_id: command_id.to_owned(),
        output,
        error: None,
        is_complete: false,
        is_error: false,
        output_mode: OutputMode::Replace,
    });
}

fn send_terminal(frame_tx: &mpsc::UnboundedSender<AgentFrame>, command_id: &str, message: String, is_error: bool) {
    let _ = frame_tx.send(AgentFrame::CommandOutput {
        command_id: command_id.to_owned(),
        output: message.clone(),
        error: Some(message),
        is_complete: true,
        is_error,
        output_mode: OutputMode::Replace,
    });
}
