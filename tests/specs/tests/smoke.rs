// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against real `lgserver`/`lgagent` binaries.
//!
//! Mirrors the literal scenarios S1-S5 (S6, the offline reaper, is covered
//! at unit-test granularity in `lgserver::reaper` since its real tick floor
//! is a full minute).

use std::time::Duration;

use lg_specs::{command_id, LgAgentProcess, LgServerProcess};

const PASSWORD: &str = "test-password";

#[tokio::test]
async fn happy_ping_streams_output_then_completes() -> anyhow::Result<()> {
    let server = LgServerProcess::start(PASSWORD, None).await?;
    let _agent = LgAgentProcess::start(&server, PASSWORD, "tokyo", "  ping:\n    template: echo\n")?;

    let session_id = server.session().await?;
    server.wait_agent_connected(&session_id, "tokyo", Duration::from_secs(5)).await?;

    let body = server.exec(&session_id, "tokyo", "ping", "1.1.1.1").await?;
    assert!(body.contains("1.1.1.1"));
    assert!(body.contains("\"success\":true"));
    Ok(())
}

#[tokio::test]
async fn unknown_command_completes_with_invalid_command_error() -> anyhow::Result<()> {
    let server = LgServerProcess::start(PASSWORD, None).await?;
    let _agent = LgAgentProcess::start(&server, PASSWORD, "tokyo", "  ping:\n    template: echo\n")?;

    let session_id = server.session().await?;
    server.wait_agent_connected(&session_id, "tokyo", Duration::from_secs(5)).await?;

    let body = server.exec(&session_id, "tokyo", "curl", "1.1.1.1").await?;
    assert!(body.contains("Invalid command"));
    assert!(body.contains("\"success\":false"));
    Ok(())
}

#[tokio::test]
async fn offline_agent_reports_not_connected() -> anyhow::Result<()> {
    let server = LgServerProcess::start(PASSWORD, None).await?;
    let agent = LgAgentProcess::start(&server, PASSWORD, "osaka", "  ping:\n    template: echo\n")?;

    let session_id = server.session().await?;
    server.wait_agent_connected(&session_id, "osaka", Duration::from_secs(5)).await?;

    drop(agent); // kill the agent process, severing its transport

    server.wait_agent_disconnected(&session_id, "osaka", Duration::from_secs(5)).await?;

    let body = server.exec(&session_id, "osaka", "ping", "1.1.1.1").await?;
    assert!(body.contains("Agent is not connected"));
    Ok(())
}

#[tokio::test]
async fn stop_mid_stream_halts_the_command() -> anyhow::Result<()> {
    let server = LgServerProcess::start(PASSWORD, None).await?;
    let spin = "  spin:\n    template: \"sh -c 'i=0; while true; do i=$((i+1)); echo out $i; sleep 0.05; done'\"\n    ignore_target: true\n";
    let _agent = LgAgentProcess::start(&server, PASSWORD, "tokyo", spin)?;

    let session_id = server.session().await?;
    server.wait_agent_connected(&session_id, "tokyo", Duration::from_secs(5)).await?;

    let id = command_id("spin", "", "tokyo", &session_id);

    let exec_task = server.exec(&session_id, "tokyo", "spin", "");
    let stop_task = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        server.stop(&session_id, &id).await
    };
    let (body, status) = tokio::join!(exec_task, stop_task);

    assert!(status?.is_success());
    let body = body?;
    assert!(body.contains("*** Stopped ***"));
    assert!(body.contains("\"stopped\":true"));
    Ok(())
}

#[tokio::test]
async fn rate_limit_denies_the_fourth_command_in_window() -> anyhow::Result<()> {
    let server = LgServerProcess::start(PASSWORD, Some(3)).await?;
    let _agent = LgAgentProcess::start(&server, PASSWORD, "tokyo", "  ping:\n    template: echo\n")?;

    let session_id = server.session().await?;
    server.wait_agent_connected(&session_id, "tokyo", Duration::from_secs(5)).await?;

    for _ in 0..3 {
        let body = server.exec(&session_id, "tokyo", "ping", "1.1.1.1").await?;
        assert!(body.contains("\"success\":true"));
    }

    let fourth = server.exec(&session_id, "tokyo", "ping", "1.1.1.1").await?;
    assert!(fourth.contains("rate limited"));
    Ok(())
}
