//! Simulation controller.
//!
//! Wires provider factory → ingestion pipeline → event bus → {broadcast
//! consumer, cache-refresh consumer} in one process, connects simulated
//! clients, and finishes with a round of read-service queries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fxstream_broadcast::{
    BroadcastConfig, BroadcastEventHandler, Broadcaster, ConnectionHandler, SubscriptionRegistry,
};
use fxstream_common::constants::{
    CACHE_CONSUMER_GROUP, RATE_UPDATES_TOPIC, WEBSOCKET_CONSUMER_GROUP,
};
use fxstream_common::CurrencyPair;
use fxstream_eventbus::{Consumer, ConsumerConfig, ConsumerStats, EventBus};
use fxstream_fx::{
    CacheRefreshHandler, CrossRateProvider, InMemoryCache, InMemoryRateRepository,
    ProviderFactory, RateProvider, RateReadService, ReadServiceConfig, RefreshMode,
    SimulatedMarketProvider,
};
use fxstream_ingestion::{
    EventPublisher, IngestionConfig, IngestionMetrics, IngestionPipeline, IngestionScheduler,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::{pick_pairs, SimulatedClient};
use crate::metrics::{
    IngestionTotals, LatencySamples, ReadReport, RegistryTotals, SimulationSummary,
};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Simulated upstream round trip.
const PROVIDER_LATENCY: (Duration, Duration) = (Duration::from_millis(2), Duration::from_millis(10));

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub clients: usize,
    /// Zero runs until Ctrl+C.
    pub duration: Duration,
    pub interval: Duration,
    pub pairs: Vec<CurrencyPair>,
    pub seed: Option<u64>,
}

/// Controls the simulation.
pub struct SimulationController {
    settings: SimulationSettings,
    rng: StdRng,
    bus: Arc<EventBus>,
    cache: Arc<InMemoryCache>,
    metrics: Arc<IngestionMetrics>,
    pipeline: Arc<IngestionPipeline>,
    connections: ConnectionHandler,
    broadcaster: Arc<Broadcaster>,
    read_service: RateReadService,
}

impl SimulationController {
    pub fn new(settings: SimulationSettings) -> anyhow::Result<Self> {
        let config = IngestionConfig {
            currency_pairs: settings.pairs.clone(),
            schedule_interval: settings.interval,
            ..IngestionConfig::default()
        };
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

        let market = match settings.seed {
            Some(seed) => SimulatedMarketProvider::with_seed(seed),
            None => SimulatedMarketProvider::new(),
        }
        .with_latency(PROVIDER_LATENCY.0, PROVIDER_LATENCY.1);
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        // The cross-rate provider has no reference table, so selection
        // falls through to the simulated market.
        let providers = ProviderFactory::new(vec![
            Arc::new(CrossRateProvider::new()) as Arc<dyn RateProvider>,
            Arc::new(market),
        ]);
        info!(provider = %providers.provider_info(), "Providers ready");

        let bus = Arc::new(EventBus::default());
        let cache = Arc::new(InMemoryCache::new());
        let repository = Arc::new(InMemoryRateRepository::new());
        let metrics = Arc::new(IngestionMetrics::new());

        let publisher =
            EventPublisher::new(bus.clone(), &config.publisher, config.source_name.clone());
        let pipeline = Arc::new(IngestionPipeline::new(
            config,
            providers,
            repository.clone(),
            publisher,
            metrics.clone(),
        ));

        let registry = Arc::new(SubscriptionRegistry::new());
        let connections = ConnectionHandler::new(registry.clone(), BroadcastConfig::from_env());
        let broadcaster = Arc::new(Broadcaster::new(registry));
        let read_service =
            RateReadService::new(cache.clone(), repository, ReadServiceConfig::default());

        Ok(Self {
            settings,
            rng,
            bus,
            cache,
            metrics,
            pipeline,
            connections,
            broadcaster,
            read_service,
        })
    }

    /// Run the simulation to completion and collect the summary.
    pub async fn run(mut self) -> anyhow::Result<SimulationSummary> {
        let started = Instant::now();
        let (stop_ingestion, ingestion_rx) = watch::channel(false);
        let (stop_consumers, consumers_rx) = watch::channel(false);

        let consumers = [
            Consumer::new(
                self.bus.clone(),
                RATE_UPDATES_TOPIC,
                WEBSOCKET_CONSUMER_GROUP,
                Arc::new(BroadcastEventHandler::new(self.broadcaster.clone())),
                ConsumerConfig::default(),
            )?,
            Consumer::new(
                self.bus.clone(),
                RATE_UPDATES_TOPIC,
                CACHE_CONSUMER_GROUP,
                Arc::new(CacheRefreshHandler::new(self.cache.clone(), RefreshMode::Refresh)),
                ConsumerConfig::default(),
            )?,
        ];
        let consumer_stats: Vec<_> = consumers.iter().map(|c| c.stats()).collect();
        let consumer_tasks: Vec<_> = consumers
            .into_iter()
            .map(|c| c.spawn(consumers_rx.clone()))
            .collect();

        let mut session_ids = Vec::with_capacity(self.settings.clients);
        let mut client_tasks = Vec::with_capacity(self.settings.clients);
        for _ in 0..self.settings.clients {
            let pairs = pick_pairs(&mut self.rng, &self.settings.pairs);
            let client = SimulatedClient::connect(&self.connections, pairs)?;
            session_ids.push(client.session_id().clone());
            client_tasks.push(client.spawn());
        }
        info!(clients = session_ids.len(), "Simulated clients connected");

        let scheduler = IngestionScheduler::new(self.pipeline.clone());
        let scheduler_task = tokio::spawn(async move { scheduler.run(ingestion_rx).await });

        if self.settings.duration.is_zero() {
            info!("Running until Ctrl+C");
            tokio::signal::ctrl_c().await?;
        } else {
            tokio::time::sleep(self.settings.duration).await;
        }

        let _ = stop_ingestion.send(true);
        scheduler_task.await?;

        let published = self.bus.topic(RATE_UPDATES_TOPIC)?.len();
        if !wait_for_drain(&consumer_stats, published, DRAIN_TIMEOUT).await {
            warn!(published, "Consumers did not catch up before shutdown");
        }
        let _ = stop_consumers.send(true);
        for task in consumer_tasks {
            let stats = task.await?;
            info!(
                processed = stats.processed,
                failed = stats.failed,
                duplicates = stats.duplicates,
                "Consumer stopped"
            );
        }

        let registry = RegistryTotals::new(
            self.broadcaster.registry().stats(),
            self.broadcaster.stats(),
        );

        for session_id in &session_ids {
            self.connections.on_disconnect(session_id);
        }
        let clients = futures::future::join_all(client_tasks)
            .await
            .into_iter()
            .filter_map(|r| match r {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "Client task failed");
                    None
                }
            })
            .collect();

        let reads = self.query_rates().await;
        self.bus.close();

        Ok(SimulationSummary {
            elapsed_ms: started.elapsed().as_millis() as u64,
            ingestion: IngestionTotals::from(self.metrics.snapshot()),
            registry,
            reads,
            clients,
        })
    }

    async fn query_rates(&self) -> ReadReport {
        let mut report = ReadReport::default();
        let mut latencies = LatencySamples::default();
        let pairs = &self.settings.pairs;

        let batch = self.read_service.get_batch(pairs).await;
        report.queries += batch.total_requested as u64;
        report.failed += batch.failed.len() as u64;
        for lookup in &batch.succeeded {
            report.tally(lookup.from_cache, lookup.degraded);
        }

        // Drop one cache entry so the next read goes to the repository.
        if let Some(first) = pairs.first() {
            if let Err(e) = self.read_service.invalidate(first).await {
                warn!(pair = %first, error = %e, "Invalidate failed");
            }
        }

        for pair in pairs {
            let started = Instant::now();
            let result = self.read_service.get_rate(pair).await;
            latencies.record(started.elapsed());
            report.queries += 1;
            match result {
                Ok(lookup) => report.tally(lookup.from_cache, lookup.degraded),
                Err(e) => {
                    warn!(pair = %pair, error = %e, "Rate query failed");
                    report.failed += 1;
                }
            }
        }

        if let Some(first) = pairs.first() {
            match self.read_service.get_historical(first, None, None, None).await {
                Ok(history) => report.history_points = history.len(),
                Err(e) => warn!(pair = %first, error = %e, "History query failed"),
            }
        }

        match self.read_service.get_supported_pairs().await {
            Ok(supported) => {
                report.supported_pairs = supported.iter().map(|p| p.code().to_string()).collect()
            }
            Err(e) => warn!(error = %e, "Supported pairs query failed"),
        }

        report.avg_latency_us = latencies.average_us();
        report.p99_latency_us = latencies.percentile_us(99);
        report
    }
}

impl ReadReport {
    fn tally(&mut self, from_cache: bool, degraded: bool) {
        if degraded {
            self.degraded += 1;
        } else if from_cache {
            self.from_cache += 1;
        } else {
            self.from_repository += 1;
        }
    }
}

/// Wait until every consumer has seen `published` records.
async fn wait_for_drain(stats: &[Arc<ConsumerStats>], published: u64, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        loop {
            let drained = stats.iter().all(|s| {
                let snapshot = s.snapshot();
                snapshot.processed + snapshot.failed + snapshot.duplicates >= published
            });
            if drained {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
