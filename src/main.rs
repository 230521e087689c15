//! Compute unit CLI entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ao_cu_common::CuConfig;
use ao_cu_core::MemoryStore;
use ao_cu_server::{AppState, CuServer, HttpScheduler, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ao_cu=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting compute unit");

    let config = CuConfig::from_env().context("Failed to load configuration")?;

    let bind_addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .context("Invalid BIND_ADDR format. Expected 'host:port' (e.g., '0.0.0.0:6363')")?;

    info!(
        bind_addr = %bind_addr,
        gateway = %config.wasm.gateway_url,
        scheduler = %config.server.scheduler_url,
        binary_dir = %config.wasm.binary_file_directory,
        "Configuration loaded"
    );

    let scheduler = Arc::new(
        HttpScheduler::new(&config.server.scheduler_url)
            .context("Failed to build scheduler client")?,
    );
    let store = Arc::new(MemoryStore::new());

    let state = AppState::new(&config, scheduler, store)
        .await
        .context("Failed to initialize the evaluation pipeline")?;

    let server_config = ServerConfig::default()
        .with_bind_addr(bind_addr)
        .with_timeout(config.server.request_timeout_secs);

    info!("Server initialized. Available endpoints:");
    info!("  POST /message  - Accept a raw signed data item");
    info!("  GET  /health   - Health check");
    info!("  GET  /ready    - Readiness check");

    CuServer::new(state, server_config).run().await?;

    Ok(())
}
