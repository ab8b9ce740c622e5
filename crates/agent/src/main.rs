// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use lgagent::config::{AgentConfig, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AgentConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.agent.log_level.clone())),
        )
        .init();

    if let Err(e) = lgagent::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
