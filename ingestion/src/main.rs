//! FxStream ingestion service binary.
//!
//! Runs the scheduler against the simulated market provider with an
//! in-process event bus and repository until Ctrl+C. The bus keeps a
//! bounded tail per partition and stored history is pruned on an interval.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxstream_eventbus::EventBus;
use fxstream_fx::{
    CrossRateProvider, InMemoryRateRepository, ProviderFactory, RateProvider,
    SimulatedMarketProvider,
};
use fxstream_ingestion::{
    EventPublisher, HistoryPruner, IngestionConfig, IngestionMetrics, IngestionPipeline,
    IngestionScheduler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting FxStream ingestion service");

    let config = IngestionConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let providers = ProviderFactory::new(vec![
        Arc::new(CrossRateProvider::new()) as Arc<dyn RateProvider>,
        Arc::new(SimulatedMarketProvider::new()),
    ]);
    info!(provider = %providers.provider_info(), "Providers ready");

    let bus = Arc::new(EventBus::default());
    let metrics = Arc::new(IngestionMetrics::new());
    let repository = Arc::new(InMemoryRateRepository::new());
    let pruner = HistoryPruner::new(
        repository.clone(),
        config.history_retention,
        config.prune_interval,
    )?;
    let publisher = EventPublisher::new(bus.clone(), &config.publisher, config.source_name.clone());
    let pipeline = Arc::new(IngestionPipeline::new(
        config,
        providers,
        repository,
        publisher,
        metrics.clone(),
    ));
    let scheduler = IngestionScheduler::new(pipeline);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let pruning = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { pruner.run(shutdown_rx).await })
    };

    scheduler.run(shutdown_rx).await;
    if let Err(e) = pruning.await {
        error!(error = %e, "History pruner task failed");
    }
    bus.close();

    info!("Ingestion service shutdown complete");
    print!("{}", metrics.to_prometheus());
    Ok(())
}
