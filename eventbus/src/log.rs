//! Partitioned append-only log.
//!
//! Each topic is split into a fixed number of partitions. Records with the
//! same key always land in the same partition, so per-key order is kept.
//! Every record also carries a topic-wide sequence number, assigned under
//! the append lock, which consumers use to replay partitions in append
//! order.
//!
//! Partitions keep at most `retention_records` records. Older records are
//! dropped from the front; offsets stay absolute, so a partition's first
//! retained offset moves forward as it is trimmed.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fxstream_protocol::EventEnvelope;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::checkpoint::CheckpointStore;
use crate::config::BusConfig;
use crate::error::{BusError, BusResult};

/// A record stored in a partition.
#[derive(Debug, Clone)]
pub struct Record {
    pub partition: usize,
    /// Position within the partition, starting at 0.
    pub offset: u64,
    /// Topic-wide append order.
    pub sequence: u64,
    pub envelope: EventEnvelope,
    pub appended_at: DateTime<Utc>,
}

/// Location of an appended record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    pub partition: usize,
    pub offset: u64,
}

/// Retained tail of one partition.
#[derive(Default)]
struct Partition {
    /// Offset of the first retained record.
    base: u64,
    records: VecDeque<Arc<Record>>,
}

impl Partition {
    fn end_offset(&self) -> u64 {
        self.base + self.records.len() as u64
    }
}

/// A named, partitioned log.
pub struct Topic {
    name: String,
    partitions: Vec<RwLock<Partition>>,
    retention: usize,
    /// Next sequence number. Held for the whole append.
    sequence: Mutex<u64>,
    round_robin: AtomicUsize,
    /// Publishes the number of records appended so far.
    appended: watch::Sender<u64>,
}

impl Topic {
    fn new(name: String, partitions: usize, retention: usize) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            name,
            partitions: (0..partitions).map(|_| RwLock::new(Partition::default())).collect(),
            retention: retention.max(1),
            sequence: Mutex::new(0),
            round_robin: AtomicUsize::new(0),
            appended,
        }
    }

    /// Topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition a key maps to. Keyless records are spread round-robin.
    pub fn partition_for(&self, key: Option<&str>) -> usize {
        let count = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % count as u64) as usize
            }
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % count,
        }
    }

    /// Append envelopes in order.
    pub fn append(&self, envelopes: Vec<EventEnvelope>) -> Vec<RecordPosition> {
        let count = envelopes.len() as u64;
        let mut positions = Vec::with_capacity(envelopes.len());
        let now = Utc::now();

        {
            let mut sequence = self.sequence.lock();
            for envelope in envelopes {
                let partition = self.partition_for(envelope.key.as_deref());
                let mut log = self.partitions[partition].write();
                let offset = log.end_offset();
                log.records.push_back(Arc::new(Record {
                    partition,
                    offset,
                    sequence: *sequence,
                    envelope,
                    appended_at: now,
                }));
                if log.records.len() > self.retention {
                    log.records.pop_front();
                    log.base += 1;
                }
                *sequence += 1;
                positions.push(RecordPosition { partition, offset });
            }
        }

        if count > 0 {
            self.appended.send_modify(|total| *total += count);
        }
        positions
    }

    fn partition(&self, partition: usize) -> BusResult<&RwLock<Partition>> {
        self.partitions
            .get(partition)
            .ok_or_else(|| BusError::UnknownPartition {
                topic: self.name.clone(),
                partition,
            })
    }

    /// Read up to `max` records starting at `from`.
    ///
    /// A `from` below the first retained offset reads from the oldest
    /// retained record.
    pub fn read(&self, partition: usize, from: u64, max: usize) -> BusResult<Vec<Arc<Record>>> {
        let log = self.partition(partition)?.read();

        if from < log.base {
            debug!(
                topic = %self.name,
                partition,
                from,
                first_retained = log.base,
                "Requested offset already trimmed"
            );
        }
        let start = (from.saturating_sub(log.base) as usize).min(log.records.len());
        Ok(log.records.iter().skip(start).take(max).cloned().collect())
    }

    /// Offset of the oldest retained record in `partition`.
    pub fn start_offset(&self, partition: usize) -> BusResult<u64> {
        Ok(self.partition(partition)?.read().base)
    }

    /// Offset the next record in `partition` will get.
    pub fn end_offset(&self, partition: usize) -> BusResult<u64> {
        Ok(self.partition(partition)?.read().end_offset())
    }

    /// Records currently held across all partitions.
    pub fn retained(&self) -> usize {
        self.partitions.iter().map(|log| log.read().records.len()).sum()
    }

    /// Total records ever appended across all partitions.
    pub fn len(&self) -> u64 {
        *self.appended.borrow()
    }

    /// Check if nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Watch for appends. The value is the running record count.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }
}

/// The in-process event bus: a set of topics plus group checkpoints.
pub struct EventBus {
    config: BusConfig,
    topics: DashMap<String, Arc<Topic>>,
    checkpoints: CheckpointStore,
    closed: AtomicBool,
}

impl EventBus {
    /// Create a new, empty bus.
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            topics: DashMap::new(),
            checkpoints: CheckpointStore::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a topic, or return it if it already exists.
    pub fn create_topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(
                    topic = %name,
                    partitions = self.config.partitions,
                    retention = self.config.retention_records,
                    "Created topic"
                );
                Arc::new(Topic::new(
                    name.to_string(),
                    self.config.partitions.max(1),
                    self.config.retention_records,
                ))
            })
            .clone()
    }

    /// Look up a topic.
    pub fn topic(&self, name: &str) -> BusResult<Arc<Topic>> {
        self.topics
            .get(name)
            .map(|t| t.clone())
            .ok_or_else(|| BusError::UnknownTopic(name.to_string()))
    }

    /// Names of all topics.
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|t| t.key().clone()).collect()
    }

    /// Append a batch of envelopes to a topic.
    pub fn publish(
        &self,
        topic: &str,
        envelopes: Vec<EventEnvelope>,
    ) -> BusResult<Vec<RecordPosition>> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let topic = self.topic(topic)?;
        let positions = topic.append(envelopes);
        debug!(topic = %topic.name(), count = positions.len(), "Appended batch");
        Ok(positions)
    }

    /// Group checkpoints.
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Stop accepting writes. Existing records stay readable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        info!("Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use fxstream_common::constants::headers;
    use fxstream_protocol::Headers;

    pub(crate) fn make_envelope(key: &str, event_id: &str) -> EventEnvelope {
        let mut hdrs = Headers::new();
        hdrs.insert(headers::CORRELATION_ID.to_string(), event_id.to_string());
        EventEnvelope::new(Some(key.to_string()), hdrs, event_id.as_bytes().to_vec())
    }

    #[test]
    fn test_same_key_same_partition() {
        let bus = EventBus::default();
        let topic = bus.create_topic("rates");

        let positions = topic.append(vec![
            make_envelope("EURUSD", "a"),
            make_envelope("EURUSD", "b"),
            make_envelope("EURUSD", "c"),
        ]);

        assert!(positions.iter().all(|p| p.partition == positions[0].partition));
        let offsets: Vec<u64> = positions.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
        assert_eq!(topic.len(), 3);
    }

    #[test]
    fn test_sequence_follows_append_order() {
        let bus = EventBus::default();
        let topic = bus.create_topic("rates");
        topic.append(vec![make_envelope("EURUSD", "a"), make_envelope("GBPUSD", "b")]);

        let mut all = Vec::new();
        for p in 0..topic.partition_count() {
            all.extend(topic.read(p, 0, 10).unwrap());
        }
        all.sort_by_key(|r| r.sequence);

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].envelope.correlation_id(), Some("a"));
        assert_eq!(all[1].envelope.correlation_id(), Some("b"));
    }

    #[test]
    fn test_create_topic_is_idempotent() {
        let bus = EventBus::default();
        let first = bus.create_topic("rates");
        first.append(vec![make_envelope("EURUSD", "a")]);

        let second = bus.create_topic("rates");
        assert_eq!(second.len(), 1);
        assert_eq!(bus.topic_names(), vec!["rates".to_string()]);
    }

    #[test]
    fn test_publish_errors() {
        let bus = EventBus::default();
        assert_eq!(
            bus.publish("missing", vec![]).unwrap_err(),
            BusError::UnknownTopic("missing".into())
        );

        bus.create_topic("rates");
        bus.close();
        assert_eq!(
            bus.publish("rates", vec![make_envelope("EURUSD", "a")])
                .unwrap_err(),
            BusError::Closed
        );
    }

    #[test]
    fn test_retention_trims_oldest_and_keeps_offsets() {
        let bus = EventBus::new(BusConfig {
            partitions: 1,
            retention_records: 3,
        });
        let topic = bus.create_topic("rates");
        let ids: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        topic.append(ids.iter().map(|id| make_envelope("EURUSD", id)).collect());

        assert_eq!(topic.len(), 5);
        assert_eq!(topic.retained(), 3);
        assert_eq!(topic.start_offset(0).unwrap(), 2);
        assert_eq!(topic.end_offset(0).unwrap(), 5);

        let from_zero = topic.read(0, 0, 10).unwrap();
        let offsets: Vec<u64> = from_zero.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![2, 3, 4]);
        assert_eq!(from_zero[0].envelope.correlation_id(), Some("2"));

        let tail = topic.read(0, 4, 10).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].offset, 4);
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let bus = EventBus::default();
        let topic = bus.create_topic("rates");
        assert!(topic.read(0, 10, 5).unwrap().is_empty());
        assert!(topic.read(99, 0, 5).is_err());
    }
}
