//! FxStream Simulator
//!
//! Runs ingestion, the event bus, the broadcaster and the read service in
//! one process with simulated subscribers, then prints a summary.

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod client;
mod controller;
mod metrics;

use controller::{SimulationController, SimulationSettings};
use fxstream_common::CurrencyPair;

/// FxStream Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "fxstream-simulator")]
#[command(about = "Run the FxStream pipeline end to end with simulated clients")]
struct Args {
    /// Number of simulated subscriber connections
    #[arg(short, long, default_value = "5")]
    clients: usize,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Ingestion interval in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Comma-separated currency pairs (defaults to the standard eight)
    #[arg(short, long, value_delimiter = ',')]
    pairs: Vec<String>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// JSON logs and a JSON summary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let pairs = if args.pairs.is_empty() {
        fxstream_common::constants::default_pairs()
    } else {
        args.pairs.iter().map(CurrencyPair::new).collect()
    };

    info!(
        clients = args.clients,
        duration_secs = args.duration,
        interval_ms = args.interval_ms,
        pairs = pairs.len(),
        "Starting FxStream simulator"
    );

    let controller = SimulationController::new(SimulationSettings {
        clients: args.clients,
        duration: Duration::from_secs(args.duration),
        interval: Duration::from_millis(args.interval_ms),
        pairs,
        seed: args.seed,
    })?;
    let summary = controller.run().await?;

    info!(
        rate_updates = summary.rate_updates_received(),
        "Simulation complete"
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.render());
    }

    Ok(())
}
