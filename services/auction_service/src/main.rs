//! Binary entry point: configuration, logging, engine wiring, shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use auction_service::collaborators::{MemoryBanRegistry, MemoryCatalog};
use auction_service::{config, MarketService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1);
    let cfg = config::init(config_path).context("failed to load configuration")?;
    tracing::info!(service = %cfg.service.name, "starting auction service");

    // Local mode runs against in-memory collaborators; production wiring
    // swaps real clients in behind the same traits.
    let bans = Arc::new(MemoryBanRegistry::default());
    let catalog = Arc::new(MemoryCatalog::default());
    let (service, queue) = MarketService::in_memory(&cfg, bans, catalog);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = service.spawn_dispatcher(queue, shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(cfg.service.shutdown_timeout, dispatcher)
        .await
        .is_err()
    {
        tracing::warn!("dispatcher did not stop within the shutdown timeout");
    }
    Ok(())
}
