//! tether agent daemon
//!
//! Runs next to a cluster (or on a node), opens the reverse tunnel to the
//! tether server, and dials local targets on the server's behalf.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_agent::Agent;
use tether_core::config::{self, AgentConfig};

#[derive(Parser)]
#[command(name = "tether-agent")]
#[command(about = "tether agent - connects to the tunnel server")]
#[command(version)]
struct Args {
    /// Tunnel server URL, e.g. wss://rancher.example:8443/v3/connect
    #[arg(short, long)]
    server: Option<String>,

    /// Registration token issued for this cluster
    #[arg(short, long, env = "TETHER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Node ID; runs as a node agent when set
    #[arg(short, long)]
    node: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tether agent starting...");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_agent_config_path);

    let mut config = if config_path.exists() {
        config::load_config(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        AgentConfig::default()
    };

    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(token) = args.token {
        config.token = token;
    }
    if let Some(node) = args.node {
        config.node = Some(node);
    }

    if config.token.is_empty() {
        anyhow::bail!("No registration token. Use --token, TETHER_TOKEN or the config file.");
    }

    match &config.node {
        Some(node) => tracing::info!("Running as node agent for {}", node),
        None => tracing::info!("Running as cluster agent"),
    }
    tracing::info!("Connecting to {}", config.server_url);

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
            _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
        }
        cancel_clone.cancel();
    });

    Agent::new(config)
        .run(cancel)
        .await
        .context("Agent stopped")?;

    tracing::info!("tether agent stopped");
    Ok(())
}
