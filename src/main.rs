//! relaymux - front-door protocol multiplexer for a reverse-tunnel relay
//!
//! One listening socket accepts both ordinary HTTP traffic (proxied to the
//! backend registered for its Host header) and tunnel-control frames from
//! connected clients.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaymux_router::{BackendRegistry, BackendTarget};
use relaymux_server_tcp::{FrontServer, FrontServerConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Relaymux - route HTTP and tunnel-control traffic from one port
#[derive(Parser, Debug)]
#[command(name = "relaymux")]
#[command(about = "Relaymux - route HTTP and tunnel-control traffic from one port")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the front-door server
    Serve {
        /// Address to listen on
        #[arg(long, env = "RELAYMUX_BIND", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,

        /// Path to the JSON route table
        #[arg(long, env = "RELAYMUX_ROUTES")]
        routes: Option<PathBuf>,
    },
}

/// One entry of the JSON route table.
#[derive(Debug, Deserialize)]
struct RouteEntry {
    host: String,
    tunnel_id: String,
    target_addr: String,
    #[serde(default)]
    metadata: Option<String>,
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Load the JSON route table into the registry.
fn load_routes(registry: &BackendRegistry, path: &Path) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read route table {}", path.display()))?;
    let entries: Vec<RouteEntry> =
        serde_json::from_str(&raw).context("Failed to parse route table")?;

    let count = entries.len();
    for entry in entries {
        let host = entry.host;
        registry
            .register(
                &host,
                BackendTarget {
                    tunnel_id: entry.tunnel_id,
                    target_addr: entry.target_addr,
                    metadata: entry.metadata,
                },
            )
            .with_context(|| format!("Duplicate route for host {}", host))?;
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Serve { bind, routes } => {
            info!(
                "relaymux {} ({}) starting...",
                env!("CARGO_PKG_VERSION"),
                env!("GIT_HASH")
            );

            let registry = Arc::new(BackendRegistry::new());
            if let Some(ref path) = routes {
                let count = load_routes(&registry, path)?;
                info!(
                    "Registered {} backend route(s) from {}",
                    count,
                    path.display()
                );
            } else {
                warn!("No route table configured; all HTTP traffic will be rejected");
            }

            let server = FrontServer::new(FrontServerConfig { bind_addr: bind }, registry);
            let shutdown = CancellationToken::new();

            let server_token = shutdown.clone();
            let mut server_task = tokio::spawn(async move { server.start(server_token).await });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, shutting down...");
                    shutdown.cancel();
                    match (&mut server_task).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("Front server exited with error: {:#}", e),
                        Err(e) => warn!("Front server task panicked: {}", e),
                    }
                }
                result = &mut server_task => {
                    match result {
                        Ok(Ok(())) => {
                            info!("Front server stopped normally");
                        }
                        Ok(Err(e)) => {
                            error!("Front server error: {:#}", e);
                            return Err(e.into());
                        }
                        Err(e) => {
                            error!("Front server task panicked: {}", e);
                            return Err(e.into());
                        }
                    }
                }
            }

            info!("relaymux stopped");
            Ok(())
        }
    }
}
