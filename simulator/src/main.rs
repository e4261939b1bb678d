//! Loyalty Simulator
//!
//! Drives the loyalty engine against an in-memory ledger and a scripted
//! accrual authority, then checks the ledger invariants.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod authority;
mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// Loyalty Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Loyalty engine simulation environment")]
struct Args {
    /// Number of simulated users for continuous mode
    #[arg(short, long, default_value = "5")]
    users: usize,

    /// Built-in scenario to run
    #[arg(short, long, conflicts_with = "scenario_file")]
    scenario: Option<String>,

    /// Scenario to run, as a JSON file
    #[arg(long)]
    scenario_file: Option<PathBuf>,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Chance that the authority answers any call with 429
    #[arg(long, default_value = "0.0")]
    rate_limit_prob: f64,

    /// Run duration in seconds (0 = infinite)
    #[arg(long, default_value = "0")]
    duration: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Loyalty Simulator");
    info!("Speed: {}x", args.speed);

    let controller =
        SimulationController::new(args.users, args.speed, args.seed, args.rate_limit_prob);

    let scenario = match (&args.scenario, &args.scenario_file) {
        (Some(name), _) => Some(Scenario::load(name)?),
        (None, Some(path)) => Some(Scenario::load_file(path)?),
        (None, None) => None,
    };

    if let Some(scenario) = scenario {
        controller.run_scenario(scenario).await?;
    } else {
        controller.initialize().await?;
        info!("Running in interactive mode with {} users", args.users);
        info!("Press Ctrl+C to stop");

        let duration = if args.duration > 0 {
            Some(std::time::Duration::from_secs(args.duration))
        } else {
            None
        };

        controller.run(duration).await?;
    }

    // Print metrics
    let metrics = controller.get_metrics().await;
    info!("Simulation complete");
    info!("Total requests: {}", metrics.total_operations);
    info!("Successful: {}", metrics.successful_operations);
    info!("Rejected: {}", metrics.rejected_operations);
    info!("Assertions passed: {}", metrics.assertions_passed);
    info!("Success rate: {:.2}", metrics.success_rate());
    info!("Throughput: {:.1} req/s", metrics.throughput());
    info!(
        "Latency avg/p50/p99: {}/{}/{}ms",
        metrics.average_latency_ms(),
        metrics.p50_latency_ms(),
        metrics.p99_latency_ms()
    );

    Ok(())
}
