//! API gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                     API GATEWAY                      │
//!                        │                                                      │
//!   Client Request       │  ┌────────┐   ┌─────────┐   ┌──────────┐             │
//!   ─────────────────────┼─▶│ server │──▶│ routing │──▶│rate limit│             │
//!                        │  └────────┘   └─────────┘   └────┬─────┘             │
//!                        │                                   ▼                  │
//!                        │                            ┌──────────────┐          │
//!                        │                            │   breaker    │          │
//!                        │                            └──────┬───────┘          │
//!                        │                                   ▼                  │
//!   Client Response      │  ┌─────────┐              ┌──────────────┐           │
//!   ◀────────────────────┼──│fallback │◀─────────────│ retry + call │◀──────────┼──── Backend
//!                        │  └─────────┘              └──────────────┘           │     Service
//!                        │                                                      │
//!                        │   config · observability · health · lifecycle        │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::config::{load_config, GatewayConfig};
use api_gateway::lifecycle::{signals, Shutdown};
use api_gateway::observability::{logging, metrics};
use api_gateway::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "api-gateway", version, about = "API gateway with rate limiting, circuit breaking and retries")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");

    if args.check {
        tracing::info!(routes = config.routes.len(), "Configuration is valid");
        return Ok(());
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        rate_limiting = config.rate_limiting.enabled,
        circuit_breaker = config.circuit_breaker.enabled,
        retries = config.retries.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(&config)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Arc::new(Shutdown::new());
    let signal = shutdown.subscribe();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::trigger_on_signal(&trigger).await;
    });

    server.run(listener, signal).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
