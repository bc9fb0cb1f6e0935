//! tether tunnel server daemon
//!
//! Accepts reverse tunnels from cluster and node agents and keeps the
//! session registry the dialers route through.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_core::config::{self, ServerConfig, TokenEntry};
use tether_core::token::generate_token;
use tether_core::MemoryInventory;
use tether_server::{DialerFactory, SessionRegistry, TokenAuthorizer, TunnelServer};

#[derive(Parser)]
#[command(name = "tether-server")]
#[command(about = "tether reverse-tunnel server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Inventory file (overrides config)
    #[arg(short, long)]
    inventory: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a registration token for a cluster and print its config entry
    Token {
        /// Cluster the token registers agents for
        cluster: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::Token { cluster }) = &args.command {
        let token = generate_token();
        let entry = TokenEntry::from_plain(cluster.as_str(), &token);
        println!("token: {}", token);
        println!();
        println!("[[tokens]]");
        println!("cluster = {:?}", entry.cluster);
        println!("token_sha256 = {:?}", entry.token_sha256);
        return Ok(());
    }

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tether server starting...");

    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_server_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ServerConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ServerConfig::default()
        }
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(inventory) = args.inventory {
        config.inventory_path = inventory;
    }
    config.validate().context("Invalid configuration")?;

    let inventory = Arc::new(if config.inventory_path.exists() {
        MemoryInventory::load(&config.inventory_path).with_context(|| {
            format!("Failed to load inventory from {:?}", config.inventory_path)
        })?
    } else {
        tracing::warn!(
            "Inventory {:?} not found - every dial will fail until it exists",
            config.inventory_path
        );
        MemoryInventory::new()
    });

    let authorizer = TokenAuthorizer::new(inventory.clone(), config.tokens.clone());
    if authorizer.is_empty() {
        tracing::warn!("No agent tokens configured - all registrations will be rejected");
    } else {
        tracing::info!("Loaded {} agent tokens", authorizer.len());
    }

    let registry = Arc::new(SessionRegistry::new());
    let factory =
        DialerFactory::from_config(&config, inventory.clone(), registry, Arc::new(authorizer));

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
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    #[cfg(unix)]
    {
        let inventory = inventory.clone();
        let path = config.inventory_path.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut hangup =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(signal) => signal,
                    Err(e) => {
                        tracing::warn!("Inventory reload on SIGHUP unavailable: {}", e);
                        return;
                    }
                };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = hangup.recv() => {
                        if let Err(e) = inventory.reload(&path) {
                            tracing::error!("Failed to reload inventory from {:?}: {}", path, e);
                        }
                    }
                }
            }
        });
    }

    let server = TunnelServer::new(&factory, cancel.clone());
    server.run(&config.bind_address).await?;

    tracing::info!("tether server shutdown complete");
    Ok(())
}
