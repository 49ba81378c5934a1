//! ISR gateway.
//!
//! Sits in front of a rendering server and owns the request path of an
//! incrementally regenerated site.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────────┐
//!                    │                     ISR GATEWAY                       │
//!                    │                                                       │
//!   Client Request   │  ┌────────┐   ┌──────────┐   ┌────────────────────┐   │
//!   ─────────────────┼─▶│  http  │──▶│ routing  │──▶│ dispatch           │   │
//!                    │  │ server │   │ resolve/ │   │  isr ─▶ render ────┼───┼──▶ Rendering
//!                    │  └────────┘   │ normalize│   │  external proxy ───┼───┼──▶ External
//!                    │               └──────────┘   └─────────┬──────────┘   │    origins
//!                    │                                        │              │
//!                    │                              ┌─────────▼─────────┐    │
//!                    │   ┌───────┐                  │ cache coordinator │    │
//!   Admin / CLI  ────┼──▶│ admin │─────────────────▶│ incremental + tag │    │
//!                    │   └───────┘                  └─────────┬─────────┘    │
//!                    │                                        │ stale        │
//!                    │                              ┌─────────▼─────────┐    │
//!                    │                              │ revalidation queue│────┼──▶ HEAD re-render
//!                    │                              └───────────────────┘    │
//!                    └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use isr_gateway::admin::{setup_admin_router, AdminState};
use isr_gateway::config::{load_config, GatewayConfig};
use isr_gateway::http::server::serve;
use isr_gateway::lifecycle::signals::wait_for_signal;
use isr_gateway::observability::{logging, metrics};
use isr_gateway::{build_gateway, GatewayServer, Shutdown};

#[derive(Parser)]
#[command(name = "isr-gateway", version, about = "ISR routing and cache gateway")]
struct Args {
    /// Path to the TOML config. Defaults apply when omitted.
    #[arg(short, long, env = "ISR_GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "isr-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let gateway = build_gateway(config, &shutdown).await?;

    let listener = TcpListener::bind(&gateway.config.listener.bind_address).await?;
    let server = tokio::spawn(GatewayServer::new(&gateway).run(listener, shutdown.subscribe()));

    let admin = if gateway.config.admin.enabled {
        let listener = TcpListener::bind(&gateway.config.admin.bind_address).await?;
        let router = setup_admin_router(AdminState::new(&gateway));
        Some(tokio::spawn(serve(listener, router, shutdown.subscribe(), "admin")))
    } else {
        None
    };

    wait_for_signal().await;
    shutdown.trigger();

    server.await??;
    if let Some(admin) = admin {
        admin.await??;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
