// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Run Relay server binary

use anyhow::Context;
use clap::Parser;
use rr_logging::CliLoggingArgs;
use rr_relay_server::dependencies::DefaultRelayDependencies;
use rr_relay_server::executor::{ScriptedExecutorFactory, ScriptedRun};
use rr_relay_server::{RelayServer, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address for the server
    #[arg(short, long, env = "RR_BIND")]
    bind: Option<SocketAddr>,

    /// Database path (SQLite, `:memory:` for a throwaway store)
    #[arg(short, long, env = "RR_DATABASE")]
    database: Option<String>,

    /// TOML configuration file; flags override its values
    #[arg(long, env = "RR_CONFIG")]
    config: Option<PathBuf>,

    /// Liveness probe period in milliseconds
    #[arg(long)]
    heartbeat_ms: Option<u64>,

    /// Maximum concurrent WebSocket connections
    #[arg(long)]
    connection_limit: Option<usize>,

    /// Shared secret for HS256 identity tokens
    #[arg(long, env = "RR_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Base URL of a remote identity service
    #[arg(long, env = "RR_IDENTITY_URL")]
    identity_url: Option<String>,

    /// API key for the remote identity service
    #[arg(long, env = "RR_IDENTITY_API_KEY", hide_env_values = true)]
    identity_api_key: Option<String>,

    /// Executor program launched per run (objective appended as last argument)
    #[arg(long)]
    executor: Option<String>,

    /// Argument passed to the executor before the objective (repeatable)
    #[arg(long = "executor-arg")]
    executor_args: Vec<String>,

    /// Replay a canned script instead of launching an executor
    #[arg(long)]
    demo: bool,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(ServerConfig, bool)> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(database) = self.database {
            config.database_path = database;
        }
        if let Some(ms) = self.heartbeat_ms {
            config.heartbeat_interval_ms = ms;
        }
        if let Some(limit) = self.connection_limit {
            config.connection_limit = limit;
        }
        if let Some(secret) = self.jwt_secret {
            config.identity.jwt_secret = Some(secret);
        }
        if let Some(url) = self.identity_url {
            config.identity.url = Some(url);
        }
        if let Some(key) = self.identity_api_key {
            config.identity.api_key = Some(key);
        }
        if let Some(command) = self.executor {
            config.executor.command = Some(command);
        }
        if !self.executor_args.is_empty() {
            config.executor.args = self.executor_args;
        }
        Ok((config, self.demo))
    }
}

fn demo_script() -> ScriptedRun {
    ScriptedRun::new()
        .step_delay(Duration::from_millis(500))
        .step("goto", "Open the start page")
        .step("click", "Accept the cookie banner")
        .step("type", "Search for the requested item")
        .finish_with("Demo run finished", Vec::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    args.logging.clone().init("rr-relay-server")?;

    let (config, demo) = args.into_config()?;
    tracing::info!(bind = %config.bind_addr, demo, "starting Run Relay");

    let dependencies = if demo {
        DefaultRelayDependencies::with_executors(
            config,
            Arc::new(ScriptedExecutorFactory::new(demo_script())),
        )?
    } else {
        DefaultRelayDependencies::new(config)?
    };

    let server = RelayServer::with_state(dependencies.into_state()).await?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            return;
        }
        shutdown.cancel();
    });

    server.run().await?;
    Ok(())
}
