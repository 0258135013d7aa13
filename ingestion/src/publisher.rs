//! Publishes rate change and ingestion status events.

use std::sync::Arc;

use fxstream_common::{FxStreamError, IngestionBatch, IngestionStatusEvent, RateChangeEvent, Result};
use fxstream_eventbus::{EventBus, Producer};
use fxstream_fx::ValidatedRate;
use fxstream_protocol::EventEnvelope;
use tracing::{debug, info, warn};

use crate::config::PublisherConfig;

/// Producer side of the event bus for the ingestion pipeline.
pub struct EventPublisher {
    rates: Producer,
    status: Producer,
    source: String,
}

impl EventPublisher {
    pub fn new(bus: Arc<EventBus>, config: &PublisherConfig, source: impl Into<String>) -> Self {
        let producer_config = config.producer_config();
        Self {
            rates: Producer::new(bus.clone(), config.topic.clone(), producer_config.clone()),
            status: Producer::new(bus, config.status_topic.clone(), producer_config),
            source: source.into(),
        }
    }

    /// Build one event per accepted rate.
    pub fn build_events(&self, accepted: &[ValidatedRate]) -> Vec<RateChangeEvent> {
        accepted
            .iter()
            .map(|v| {
                RateChangeEvent::new(
                    v.rate.clone(),
                    v.previous.clone(),
                    v.change_percent,
                    self.source.clone(),
                )
            })
            .collect()
    }

    /// Publish rate change events in order. Any failure fails the whole call.
    pub fn publish_rates(&self, events: &[RateChangeEvent]) -> Result<usize> {
        let envelopes = events
            .iter()
            .map(EventEnvelope::from_rate_event)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| FxStreamError::PublishFailure(e.to_string()))?;

        let sent = self.rates.send_all(envelopes)?;
        info!(topic = %self.rates.topic(), sent, "Published rate change events");
        Ok(sent)
    }

    /// Publish the status event for a batch. Failures are logged, never returned.
    pub fn publish_status(&self, batch: &IngestionBatch) -> bool {
        let event = IngestionStatusEvent::from_batch(batch);
        let result = EventEnvelope::from_status_event(&event, &self.source)
            .and_then(|envelope| Ok(self.status.send_all([envelope])?));

        match result {
            Ok(_) => {
                debug!(batch_id = %batch.batch_id, status = %event.status, "Published ingestion status");
                true
            }
            Err(e) => {
                warn!(batch_id = %batch.batch_id, error = %e, "Failed to publish ingestion status");
                false
            }
        }
    }
}
