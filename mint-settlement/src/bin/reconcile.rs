//! Resolve settlements left in flight by a previous run

use anyhow::Context;
use mint_settlement::{Config, SettlementCoordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };

    tracing::info!(ledger = %config.ledger.data_dir.display(), "Starting reconciliation");

    let coordinator = SettlementCoordinator::from_config(config)
        .await
        .context("starting settlement coordinator")?;

    let report = coordinator.reconcile().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    coordinator.shutdown().await?;
    Ok(())
}
