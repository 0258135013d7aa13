//! Batching producer.

use std::sync::Arc;

use fxstream_protocol::EventEnvelope;
use tracing::{debug, instrument};

use crate::config::ProducerConfig;
use crate::error::{BusError, BusResult};
use crate::log::EventBus;

/// A batch of envelopes bounded by count and encoded size.
#[derive(Debug)]
pub struct EventBatch {
    events: Vec<EventEnvelope>,
    size_bytes: usize,
    max_events: usize,
    max_bytes: usize,
}

impl EventBatch {
    fn new(config: &ProducerConfig) -> Self {
        Self {
            events: Vec::new(),
            size_bytes: 0,
            max_events: config.max_batch_events,
            max_bytes: config.max_batch_bytes,
        }
    }

    /// Add an envelope, handing it back if the batch is full.
    pub fn try_add(&mut self, envelope: EventEnvelope) -> Result<(), EventEnvelope> {
        let size = envelope.size_bytes();
        if self.events.len() >= self.max_events || self.size_bytes + size > self.max_bytes {
            return Err(envelope);
        }

        self.size_bytes += size;
        self.events.push(envelope);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// Writes envelopes to one topic in batches.
#[derive(Clone)]
pub struct Producer {
    bus: Arc<EventBus>,
    topic: String,
    config: ProducerConfig,
}

impl Producer {
    /// Create a producer for `topic`. The topic is created if missing.
    pub fn new(bus: Arc<EventBus>, topic: impl Into<String>, config: ProducerConfig) -> Self {
        let topic = topic.into();
        bus.create_topic(&topic);
        Self { bus, topic, config }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Open an empty batch.
    pub fn create_batch(&self) -> EventBatch {
        EventBatch::new(&self.config)
    }

    /// Send a batch. Returns the number of events written.
    pub fn send_batch(&self, batch: EventBatch) -> BusResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        debug!(topic = %self.topic, count, bytes = batch.size_bytes, "Sending batch");
        self.bus.publish(&self.topic, batch.events)?;
        Ok(count)
    }

    /// Send every envelope, flushing a batch whenever it fills up.
    ///
    /// No envelope is dropped because of batch overflow; an envelope that
    /// does not fit even in an empty batch fails the call.
    #[instrument(skip(self, envelopes), fields(topic = %self.topic))]
    pub fn send_all(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope>,
    ) -> BusResult<usize> {
        let mut batch = self.create_batch();
        let mut sent = 0;

        for envelope in envelopes {
            if let Err(envelope) = batch.try_add(envelope) {
                let full = std::mem::replace(&mut batch, self.create_batch());
                sent += self.send_batch(full)?;

                if let Err(envelope) = batch.try_add(envelope) {
                    return Err(BusError::EventTooLarge {
                        size: envelope.size_bytes(),
                        limit: self.config.max_batch_bytes,
                    });
                }
            }
        }

        sent += self.send_batch(batch)?;
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::log::tests::make_envelope;
    use tokio_test::assert_ok;

    fn producer(max_events: usize, max_bytes: usize) -> (Arc<EventBus>, Producer) {
        let bus = Arc::new(EventBus::new(BusConfig {
            partitions: 1,
            ..Default::default()
        }));
        let producer = Producer::new(
            bus.clone(),
            "rates",
            ProducerConfig {
                max_batch_events: max_events,
                max_batch_bytes: max_bytes,
            },
        );
        (bus, producer)
    }

    #[test]
    fn test_full_batch_rejects_add() {
        let (_bus, producer) = producer(2, 1024);
        let mut batch = producer.create_batch();

        assert!(batch.try_add(make_envelope("EURUSD", "a")).is_ok());
        assert!(batch.try_add(make_envelope("EURUSD", "b")).is_ok());
        let rejected = batch.try_add(make_envelope("EURUSD", "c")).unwrap_err();
        assert_eq!(rejected.correlation_id(), Some("c"));
    }

    #[test]
    fn test_overflow_flushes_without_dropping() {
        let (bus, producer) = producer(2, 1024);
        let envelopes: Vec<_> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| make_envelope("EURUSD", id))
            .collect();

        let sent = producer.send_all(envelopes).unwrap();
        assert_eq!(sent, 5);

        let records = bus.topic("rates").unwrap().read(0, 0, 10).unwrap();
        let ids: Vec<_> = records
            .iter()
            .filter_map(|r| r.envelope.correlation_id())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_byte_limit_flushes() {
        let one = make_envelope("EURUSD", "a").size_bytes();
        let (bus, producer) = producer(100, one * 2);

        let sent = assert_ok!(producer.send_all((0..3).map(|_| make_envelope("EURUSD", "a"))));
        assert_eq!(sent, 3);
        assert_eq!(bus.topic("rates").unwrap().len(), 3);
    }

    #[test]
    fn test_oversized_event_fails() {
        let (_bus, producer) = producer(100, 4);
        let err = producer
            .send_all(vec![make_envelope("EURUSD", "too-big")])
            .unwrap_err();
        assert!(matches!(err, BusError::EventTooLarge { limit: 4, .. }));
    }
}
