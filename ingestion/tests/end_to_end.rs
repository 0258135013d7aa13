//! Ingestion through the event bus to subscribed clients and the cache.

use std::sync::Arc;

use fxstream_broadcast::{
    BroadcastConfig, BroadcastEventHandler, Broadcaster, ConnectionHandler, SubscriptionRegistry,
};
use fxstream_common::constants::{
    CACHE_CONSUMER_GROUP, RATE_UPDATES_TOPIC, WEBSOCKET_CONSUMER_GROUP,
};
use fxstream_common::{IngestionStatus, Rate, RateChangeEvent};
use fxstream_eventbus::{Consumer, ConsumerConfig, EventBus, Record};
use fxstream_fx::{
    CacheRefreshHandler, FailingRepository, InMemoryCache, MockRateProvider, ProviderFactory,
    RateProvider, RateReadService, RateRepository, ReadServiceConfig, RefreshMode,
};
use fxstream_ingestion::{EventPublisher, IngestionConfig, IngestionMetrics, IngestionPipeline};
use rust_decimal_macros::dec;
use serde_json::Value;
use tokio_test::assert_ok;

struct System {
    bus: Arc<EventBus>,
    provider: Arc<MockRateProvider>,
    repository: Arc<FailingRepository>,
    pipeline: IngestionPipeline,
}

fn setup_system(pairs: &[&str]) -> System {
    let bus = Arc::new(EventBus::default());
    let provider = Arc::new(MockRateProvider::new("mock"));
    let repository = Arc::new(FailingRepository::new());
    let config = IngestionConfig {
        currency_pairs: pairs.iter().map(|p| (*p).into()).collect(),
        ..Default::default()
    };
    let publisher = EventPublisher::new(bus.clone(), &config.publisher, config.source_name.clone());
    let pipeline = IngestionPipeline::new(
        config,
        ProviderFactory::new(vec![provider.clone() as Arc<dyn RateProvider>]),
        repository.clone(),
        publisher,
        Arc::new(IngestionMetrics::new()),
    );
    System {
        bus,
        provider,
        repository,
        pipeline,
    }
}

#[tokio::test]
async fn missing_pair_still_delivers_two_updates_in_order() {
    let system = setup_system(&["EURUSD", "GBPUSD", "USDJPY"]);
    system
        .provider
        .set_rate(Rate::new("EURUSD".into(), dec!(1.0850), "mock"));
    system
        .provider
        .set_rate(Rate::new("GBPUSD".into(), dec!(1.2650), "mock"));

    let registry = Arc::new(SubscriptionRegistry::new());
    let connections = ConnectionHandler::new(registry.clone(), BroadcastConfig::default());
    let (session_id, mut frames) = connections.open_session();
    assert_ok!(connections.on_message(
        &session_id,
        r#"{"action":"subscribe","currencyPairs":["EURUSD","GBPUSD"]}"#,
    ));
    assert_eq!(drain(&mut frames).len(), 2);

    let batch = system.pipeline.run_once().await;
    assert_eq!(batch.status, Some(IngestionStatus::Partial));
    assert_eq!(batch.fetched, 2);
    assert_eq!(batch.accepted, 2);
    assert_eq!(batch.persisted, 2);
    assert_eq!(batch.published, 2);
    assert_eq!(system.repository.inner().len(), 2);

    let broadcaster = Arc::new(Broadcaster::new(registry));
    let mut consumer = Consumer::new(
        system.bus.clone(),
        RATE_UPDATES_TOPIC,
        WEBSOCKET_CONSUMER_GROUP,
        Arc::new(BroadcastEventHandler::new(broadcaster)),
        ConsumerConfig::default(),
    )
    .unwrap();
    assert_eq!(consumer.poll_once().await, 2);

    let updates = drain(&mut frames);
    assert_eq!(updates.len(), 2);
    let pairs: Vec<&str> = updates
        .iter()
        .map(|f| {
            assert_eq!(f["type"], "rateUpdate");
            f["event"]["rate"]["currencyPair"].as_str().unwrap()
        })
        .collect();
    let mut published_order = Vec::new();
    for record in read_all(&system.bus) {
        let event: RateChangeEvent = record.envelope.decode().unwrap();
        published_order.push(event.rate.pair.code().to_string());
    }
    assert_eq!(pairs, published_order);
}

#[tokio::test]
async fn cache_updater_serves_fresh_rates_to_readers() {
    let system = setup_system(&["EURUSD"]);
    system
        .provider
        .set_rate(Rate::new("EURUSD".into(), dec!(1.0850), "mock"));
    system.pipeline.run_once().await;

    let cache = Arc::new(InMemoryCache::new());
    let mut consumer = Consumer::new(
        system.bus.clone(),
        RATE_UPDATES_TOPIC,
        CACHE_CONSUMER_GROUP,
        Arc::new(CacheRefreshHandler::new(cache.clone(), RefreshMode::Refresh)),
        ConsumerConfig::default(),
    )
    .unwrap();
    assert_eq!(consumer.poll_once().await, 1);

    system.repository.set_failing(true);
    let service = RateReadService::new(
        cache,
        system.repository.clone() as Arc<dyn RateRepository>,
        ReadServiceConfig::default(),
    );
    let lookup = service.get_rate(&"EURUSD".into()).await.unwrap();
    assert!(lookup.from_cache);
    assert!(!lookup.degraded);
    assert_eq!(lookup.rate.rate, dec!(1.0850));
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<Arc<str>>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame).unwrap());
    }
    frames
}

fn read_all(bus: &EventBus) -> Vec<Arc<Record>> {
    let topic = bus.topic(RATE_UPDATES_TOPIC).unwrap();
    let mut records: Vec<_> = (0..topic.partition_count())
        .flat_map(|p| topic.read(p, 0, 100).unwrap())
        .collect();
    records.sort_by_key(|r| r.sequence);
    records
}
