//! Loyalty Engine Binary
//!
//! Runs the accrual poller against a PostgreSQL ledger until interrupted.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loyalty_accrual::HttpAccrualClient;
use loyalty_engine::{EngineConfig, LoyaltyService};
use loyalty_ledger::PostgresLedger;

#[derive(Parser, Debug)]
#[command(name = "loyalty-engine")]
#[command(about = "Loyalty points accrual reconciliation engine")]
struct Args {
    /// PostgreSQL connection string (overridden by DATABASE_URI)
    #[arg(short = 'd', long)]
    database_uri: Option<String>,

    /// Accrual system base address (overridden by ACCRUAL_SYSTEM_ADDRESS)
    #[arg(short = 'r', long)]
    accrual_address: Option<String>,

    /// Number of poller workers (overridden by POLLER_WORKERS)
    #[arg(short = 'w', long)]
    workers: Option<usize>,
}

impl Args {
    fn into_config(self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(url) = self.database_uri {
            config.database.url = url;
        }
        if let Some(addr) = self.accrual_address {
            config.accrual_address = addr;
        }
        if let Some(workers) = self.workers {
            config.poller.workers = workers;
        }
        config.apply_env();
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting loyalty engine");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("{}", e));
    }

    let pool = loyalty_ledger::connect(&config.database.url, config.database.max_connections).await?;
    loyalty_ledger::migrate(&pool).await?;
    let store = Arc::new(PostgresLedger::new(pool));

    let client = HttpAccrualClient::new(&config.accrual_address, config.poller.request_timeout)?
        .with_default_retry_after(config.poller.default_retry_after);

    let service = LoyaltyService::new(config.clone(), store, Arc::new(client));
    service.start().await?;

    info!(
        accrual_address = %config.accrual_address,
        workers = config.poller.workers,
        "Loyalty engine running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    service.stop().await?;

    let snapshot = service.metrics().snapshot();
    info!(metrics = %serde_json::to_string(&snapshot)?, "Final metrics");
    info!("Loyalty engine shutdown complete");
    Ok(())
}
