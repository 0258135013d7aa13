//! Consumer groups.
//!
//! A [`Consumer`] reads one topic on behalf of a named group and hands each
//! record to an [`EventHandler`]. The group's checkpoint advances only when
//! the handler succeeds; a failing record is logged and skipped so the loop
//! keeps going (at-least-once, handlers must be idempotent). Records whose
//! event ID was already handled are acknowledged without calling the
//! handler again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConsumerConfig, StartPosition};
use crate::dedupe::DedupeWindow;
use crate::error::{BusError, BusResult};
use crate::log::{EventBus, Record, Topic};

/// Processes records delivered to a consumer group.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, record: &Record) -> fxstream_common::Result<()>;
}

/// Counters for one consumer.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    duplicates: AtomicU64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time consumer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumerStatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub duplicates: u64,
}

/// Reads a topic for one consumer group.
pub struct Consumer {
    bus: Arc<EventBus>,
    topic: Arc<Topic>,
    group: String,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
    /// Next offset to read per partition.
    cursors: Vec<u64>,
    dedupe: DedupeWindow,
    stats: Arc<ConsumerStats>,
}

impl Consumer {
    /// Attach a group to a topic, resuming from its checkpoints.
    pub fn new(
        bus: Arc<EventBus>,
        topic: &str,
        group: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        config: ConsumerConfig,
    ) -> BusResult<Self> {
        config.validate().map_err(BusError::InvalidConfig)?;
        let group = group.into();
        let topic = bus.topic(topic)?;

        let mut cursors = Vec::with_capacity(topic.partition_count());
        for partition in 0..topic.partition_count() {
            let start = match bus.checkpoints().get(&group, topic.name(), partition) {
                Some(offset) => offset,
                None => match config.start_position {
                    StartPosition::Earliest => 0,
                    StartPosition::Latest => topic.end_offset(partition)?,
                },
            };
            cursors.push(start);
        }

        info!(group = %group, topic = %topic.name(), "Consumer attached");

        Ok(Self {
            bus,
            topic,
            group,
            handler,
            dedupe: DedupeWindow::new(config.dedupe_window),
            config,
            cursors,
            stats: Arc::new(ConsumerStats::default()),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Shared counters, readable while the consumer runs.
    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Process everything currently available. Returns the number of
    /// records consumed.
    pub async fn poll_once(&mut self) -> usize {
        self.poll(None).await
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    ///
    /// A record already handed to the handler is finished before the loop
    /// exits.
    #[instrument(skip_all, fields(group = %self.group, topic = %self.topic.name()))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ConsumerStatsSnapshot {
        let mut appended = self.topic.subscribe();
        info!("Consumer loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            appended.borrow_and_update();
            if self.poll(Some(&shutdown)).await > 0 {
                continue;
            }

            tokio::select! {
                changed = appended.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            processed = stats.processed,
            failed = stats.failed,
            duplicates = stats.duplicates,
            "Consumer loop stopped"
        );
        stats
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<ConsumerStatsSnapshot> {
        tokio::spawn(self.run(shutdown))
    }

    async fn poll(&mut self, shutdown: Option<&watch::Receiver<bool>>) -> usize {
        let records = self.fetch();
        let mut consumed = 0;

        for record in records {
            if shutdown.map_or(false, |s| *s.borrow()) {
                break;
            }
            self.process(&record).await;
            self.cursors[record.partition] = record.offset + 1;
            consumed += 1;
        }

        consumed
    }

    /// Gather pending records from every partition in append order.
    ///
    /// When a partition hits the per-poll limit, records sequenced after
    /// its last fetched one are held back so the merge never reorders.
    fn fetch(&self) -> Vec<Arc<Record>> {
        let max = self.config.max_poll_records;
        let mut merged = Vec::new();
        let mut horizon = u64::MAX;

        for (partition, cursor) in self.cursors.iter().enumerate() {
            match self.topic.read(partition, *cursor, max) {
                Ok(records) => {
                    if let Some(first) = records.first().filter(|r| r.offset > *cursor) {
                        warn!(
                            partition,
                            cursor = *cursor,
                            first_retained = first.offset,
                            "Records trimmed before this group consumed them"
                        );
                    }
                    if records.len() == max {
                        if let Some(last) = records.last() {
                            horizon = horizon.min(last.sequence);
                        }
                    }
                    merged.extend(records);
                }
                Err(e) => warn!(partition, error = %e, "Partition read failed"),
            }
        }

        merged.retain(|r| r.sequence <= horizon);
        merged.sort_by_key(|r| r.sequence);
        merged
    }

    async fn process(&mut self, record: &Record) {
        let event_id = record.envelope.correlation_id().map(str::to_owned);

        if let Some(id) = &event_id {
            if self.dedupe.contains(id) {
                debug!(event_id = %id, "Skipping duplicate event");
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                self.commit(record);
                return;
            }
        }

        match self.handler.handle(record).await {
            Ok(()) => {
                self.commit(record);
                if let Some(id) = event_id {
                    self.dedupe.insert(id);
                }
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    event_id = ?event_id,
                    error = %e,
                    "Error processing event"
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn commit(&self, record: &Record) {
        self.bus.checkpoints().commit(
            &self.group,
            self.topic.name(),
            record.partition,
            record.offset + 1,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::log::tests::make_envelope;
    use fxstream_common::FxStreamError;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingHandler {
        fn failing_on(id: &str) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_on: Some(id.to_string()),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, record: &Record) -> fxstream_common::Result<()> {
            let id = record.envelope.correlation_id().unwrap_or_default().to_string();
            if self.fail_on.as_deref() == Some(id.as_str()) {
                return Err(FxStreamError::Internal("boom".into()));
            }
            self.seen.lock().push(id);
            Ok(())
        }
    }

    fn setup(partitions: usize) -> Arc<EventBus> {
        let bus = Arc::new(EventBus::new(BusConfig {
            partitions,
            ..Default::default()
        }));
        bus.create_topic("rates");
        bus
    }

    fn publish(bus: &EventBus, items: &[(&str, &str)]) {
        let envelopes = items.iter().map(|(k, id)| make_envelope(k, id)).collect();
        bus.publish("rates", envelopes).unwrap();
    }

    #[tokio::test]
    async fn test_consumes_in_append_order_across_partitions() {
        let bus = setup(4);
        publish(
            &bus,
            &[("EURUSD", "1"), ("GBPUSD", "2"), ("USDJPY", "3"), ("EURUSD", "4")],
        );

        let handler = Arc::new(RecordingHandler::default());
        let mut consumer =
            Consumer::new(bus.clone(), "rates", "g", handler.clone(), ConsumerConfig::default())
                .unwrap();

        assert_eq!(consumer.poll_once().await, 4);
        assert_eq!(handler.seen(), vec!["1", "2", "3", "4"]);
        assert_eq!(consumer.poll_once().await, 0);
    }

    #[tokio::test]
    async fn test_small_poll_limit_keeps_order() {
        let bus = setup(2);
        let items: Vec<(String, String)> = (0..10)
            .map(|i| (format!("PAIR{:02}", i % 3), i.to_string()))
            .collect();
        let refs: Vec<(&str, &str)> = items.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        publish(&bus, &refs);

        let handler = Arc::new(RecordingHandler::default());
        let config = ConsumerConfig {
            max_poll_records: 2,
            ..Default::default()
        };
        let mut consumer = Consumer::new(bus.clone(), "rates", "g", handler.clone(), config).unwrap();

        while consumer.poll_once().await > 0 {}

        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(handler.seen(), expected);
    }

    #[tokio::test]
    async fn test_failure_does_not_checkpoint_and_loop_continues() {
        let bus = setup(1);
        publish(&bus, &[("EURUSD", "a"), ("EURUSD", "b")]);

        let handler = Arc::new(RecordingHandler::failing_on("b"));
        let mut consumer =
            Consumer::new(bus.clone(), "rates", "g", handler.clone(), ConsumerConfig::default())
                .unwrap();

        assert_eq!(consumer.poll_once().await, 2);
        assert_eq!(handler.seen(), vec!["a"]);
        assert_eq!(bus.checkpoints().get("g", "rates", 0), Some(1));
        assert_eq!(consumer.stats().snapshot().failed, 1);

        publish(&bus, &[("EURUSD", "c")]);
        assert_eq!(consumer.poll_once().await, 1);
        assert_eq!(handler.seen(), vec!["a", "c"]);
        assert_eq!(bus.checkpoints().get("g", "rates", 0), Some(3));
    }

    #[tokio::test]
    async fn test_duplicate_event_handled_once() {
        let bus = setup(1);
        publish(&bus, &[("EURUSD", "same"), ("EURUSD", "same")]);

        let handler = Arc::new(RecordingHandler::default());
        let mut consumer =
            Consumer::new(bus.clone(), "rates", "g", handler.clone(), ConsumerConfig::default())
                .unwrap();

        consumer.poll_once().await;
        assert_eq!(handler.seen(), vec!["same"]);
        assert_eq!(
            consumer.stats().snapshot(),
            ConsumerStatsSnapshot {
                processed: 1,
                failed: 0,
                duplicates: 1
            }
        );
        assert_eq!(bus.checkpoints().get("g", "rates", 0), Some(2));
    }

    #[tokio::test]
    async fn test_groups_read_independently() {
        let bus = setup(1);
        publish(&bus, &[("EURUSD", "a"), ("GBPUSD", "b")]);

        let first = Arc::new(RecordingHandler::default());
        let second = Arc::new(RecordingHandler::default());
        let mut c1 =
            Consumer::new(bus.clone(), "rates", "websocket-service", first.clone(), ConsumerConfig::default())
                .unwrap();
        let mut c2 =
            Consumer::new(bus.clone(), "rates", "cache-updater", second.clone(), ConsumerConfig::default())
                .unwrap();

        c1.poll_once().await;
        c2.poll_once().await;
        assert_eq!(first.seen(), vec!["a", "b"]);
        assert_eq!(second.seen(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_new_consumer_resumes_from_checkpoint() {
        let bus = setup(1);
        publish(&bus, &[("EURUSD", "a"), ("EURUSD", "b")]);

        let handler = Arc::new(RecordingHandler::default());
        let mut consumer =
            Consumer::new(bus.clone(), "rates", "g", handler.clone(), ConsumerConfig::default())
                .unwrap();
        consumer.poll_once().await;
        drop(consumer);

        publish(&bus, &[("EURUSD", "c")]);
        let resumed = Arc::new(RecordingHandler::default());
        let mut consumer =
            Consumer::new(bus.clone(), "rates", "g", resumed.clone(), ConsumerConfig::default())
                .unwrap();
        consumer.poll_once().await;
        assert_eq!(resumed.seen(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_latest_start_skips_backlog() {
        let bus = setup(1);
        publish(&bus, &[("EURUSD", "old")]);

        let handler = Arc::new(RecordingHandler::default());
        let config = ConsumerConfig {
            start_position: StartPosition::Latest,
            ..Default::default()
        };
        let mut consumer = Consumer::new(bus.clone(), "rates", "g", handler.clone(), config).unwrap();

        publish(&bus, &[("EURUSD", "new")]);
        consumer.poll_once().await;
        assert_eq!(handler.seen(), vec!["new"]);
    }

    #[tokio::test]
    async fn test_run_wakes_on_append_and_stops_on_shutdown() {
        let bus = setup(2);
        let handler = Arc::new(RecordingHandler::default());
        let consumer =
            Consumer::new(bus.clone(), "rates", "g", handler.clone(), ConsumerConfig::default())
                .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);

        publish(&bus, &[("EURUSD", "a"), ("GBPUSD", "b")]);
        for _ in 0..100 {
            if handler.seen().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.seen(), vec!["a", "b"]);

        shutdown_tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.processed, 2);
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let bus = Arc::new(EventBus::default());
        let handler = Arc::new(RecordingHandler::default());
        assert!(Consumer::new(bus, "missing", "g", handler, ConsumerConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let bus = setup(1);
        let handler = Arc::new(RecordingHandler::default());
        let config = ConsumerConfig {
            max_poll_records: 0,
            ..Default::default()
        };

        let result = Consumer::new(bus, "rates", "g", handler, config);
        assert!(matches!(result, Err(BusError::InvalidConfig(_))));
    }

    /// Blocks inside `handle` until released.
    #[derive(Default)]
    struct GatedHandler {
        started: Notify,
        release: Notify,
        completed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for GatedHandler {
        async fn handle(&self, record: &Record) -> fxstream_common::Result<()> {
            self.started.notify_one();
            self.release.notified().await;
            let id = record.envelope.correlation_id().unwrap_or_default().to_string();
            self.completed.lock().push(id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_finishes_in_flight_record_and_commits() {
        let bus = setup(1);
        let handler = Arc::new(GatedHandler::default());
        let consumer =
            Consumer::new(bus.clone(), "rates", "g", handler.clone(), ConsumerConfig::default())
                .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = consumer.spawn(shutdown_rx);
        publish(&bus, &[("EURUSD", "a"), ("EURUSD", "b")]);

        tokio::time::timeout(Duration::from_secs(1), handler.started.notified())
            .await
            .unwrap();
        shutdown_tx.send(true).unwrap();
        assert_eq!(bus.checkpoints().get("g", "rates", 0), None);
        handler.release.notify_one();

        let stats = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(*handler.completed.lock(), vec!["a".to_string()]);
        assert_eq!(bus.checkpoints().get("g", "rates", 0), Some(1));
    }

    #[tokio::test]
    async fn test_lagging_group_resumes_after_trimmed_records() {
        let bus = Arc::new(EventBus::new(BusConfig {
            partitions: 1,
            retention_records: 2,
        }));
        bus.create_topic("rates");
        publish(&bus, &[("EURUSD", "a"), ("EURUSD", "b"), ("EURUSD", "c"), ("EURUSD", "d")]);

        let handler = Arc::new(RecordingHandler::default());
        let mut consumer =
            Consumer::new(bus.clone(), "rates", "g", handler.clone(), ConsumerConfig::default())
                .unwrap();

        assert_eq!(consumer.poll_once().await, 2);
        assert_eq!(handler.seen(), vec!["c", "d"]);
        assert_eq!(bus.checkpoints().get("g", "rates", 0), Some(4));
    }
}
