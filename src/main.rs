//! WebSocket Tunnel Relay
//!
//! Accepts WebSocket sessions carrying a small binary request header, then
//! relays the session's bytes to a TCP destination, or tunnels DNS over HTTPS
//! for UDP port 53.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                     TUNNEL RELAY                      │
//!   WebSocket client     │  ┌────────┐   ┌─────────┐   ┌──────────┐             │
//!   ─────────────────────┼─▶│  http  │──▶│ session │──▶│ protocol │             │
//!                        │  │ server │   │ adapter │   │  header  │             │
//!                        │  └───┬────┘   └────┬────┘   └──────────┘             │
//!                        │      │ plain HTTP  │                                  │
//!                        │      ▼             ▼                                  │
//!                        │ ┌───────────┐ ┌─────────────┐    ┌─────────────┐     │
//!                        │ │passthrough│ │ relay::tcp  │───▶│  outbound   │─────┼──▶ destination
//!                        │ └───────────┘ │ relay::doh  │───▶│  DoH (POST) │─────┼──▶ resolver
//!                        │               └─────────────┘    └─────────────┘     │
//!                        │  ┌─────────────────────────────────────────────────┐ │
//!                        │  │ config (toml, hot reload) · observability ·     │ │
//!                        │  │ lifecycle (signals, drain) · net (limits, TLS)  │ │
//!                        │  └─────────────────────────────────────────────────┘ │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use tunnel_relay::config::{load_config, load_from_env, ConfigWatcher};
use tunnel_relay::http::HttpServer;
use tunnel_relay::lifecycle::{signals, Shutdown};
use tunnel_relay::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "tunnel-relay")]
#[command(about = "WebSocket tunnel relay", long_about = None)]
struct Cli {
    /// TOML configuration file. Without it, defaults plus environment apply.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    if cli.check {
        println!("configuration ok");
        return Ok(());
    }

    logging::init_logging(&config.observability)?;
    tracing::info!("tunnel-relay v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_sessions = config.listener.max_sessions,
        fallback_hosts = config.relay.fallback_hosts.len(),
        doh_url = %config.dns.doh_url,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    // The watcher must stay alive for reloads to keep arriving.
    let (_watcher, updates) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), Some(updates))
        }
        None => (None, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(signals::forward_signals(shutdown.clone()));

    let server = HttpServer::new(config)?;
    server.run(listener, updates, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
