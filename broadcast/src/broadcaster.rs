//! Fan-out of rate updates to subscribed sessions.
//!
//! A broadcast encodes the event once and hands the same frame to every
//! open subscriber. Sessions that are closed or whose send fails are
//! collected and unregistered after the loop; failed sends are not retried.
//! A session that re-registered with a new sink meanwhile is left in place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fxstream_common::{RateChangeEvent, Result, SessionId, RATE_UPDATED_EVENT_TYPE};
use fxstream_eventbus::{EventHandler, Record};
use fxstream_protocol::encode_rate_update;
use tracing::{debug, instrument, warn};

use crate::registry::SubscriptionRegistry;

/// Result of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    /// Sessions unregistered because they could not take the frame.
    pub evicted: Vec<SessionId>,
}

/// Broadcast counters.
#[derive(Debug, Default)]
pub struct BroadcastStats {
    events: AtomicU64,
    frames_sent: AtomicU64,
    sessions_evicted: AtomicU64,
}

impl BroadcastStats {
    pub fn snapshot(&self) -> BroadcastStatsSnapshot {
        BroadcastStatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastStatsSnapshot {
    pub events: u64,
    pub frames_sent: u64,
    pub sessions_evicted: u64,
}

/// Sends rate updates to the sessions registered in a [`SubscriptionRegistry`].
pub struct Broadcaster {
    registry: Arc<SubscriptionRegistry>,
    stats: BroadcastStats,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            stats: BroadcastStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> BroadcastStatsSnapshot {
        self.stats.snapshot()
    }

    /// Deliver `event` to every session subscribed to its pair.
    #[instrument(skip(self, event), fields(pair = %event.pair(), event_id = %event.event_id))]
    pub fn broadcast(&self, event: &RateChangeEvent) -> Result<BroadcastOutcome> {
        let sessions = self.registry.subscribers_of(event.pair());
        if sessions.is_empty() {
            debug!("No subscribers");
            return Ok(BroadcastOutcome::default());
        }

        let frame = encode_rate_update(event)?;
        self.stats.events.fetch_add(1, Ordering::Relaxed);

        let mut outcome = BroadcastOutcome::default();
        let mut failed = Vec::new();
        for session in sessions {
            if !session.is_open() {
                failed.push(session);
                continue;
            }
            match session.try_send(frame.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!(session_id = %session.session_id(), error = %e, "Failed to send rate update");
                    failed.push(session);
                }
            }
        }

        // Only the sink that failed is removed; a reconnect under the same ID survives.
        for session in failed {
            if self.registry.evict(&session) {
                outcome.evicted.push(session.session_id().clone());
            }
        }

        self.stats
            .frames_sent
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.stats
            .sessions_evicted
            .fetch_add(outcome.evicted.len() as u64, Ordering::Relaxed);
        debug!(
            delivered = outcome.delivered,
            evicted = outcome.evicted.len(),
            "Broadcast complete"
        );
        Ok(outcome)
    }
}

/// Event handler for the websocket consumer group.
pub struct BroadcastEventHandler {
    broadcaster: Arc<Broadcaster>,
}

impl BroadcastEventHandler {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl EventHandler for BroadcastEventHandler {
    async fn handle(&self, record: &Record) -> Result<()> {
        if record.envelope.event_type() != Some(RATE_UPDATED_EVENT_TYPE) {
            debug!(event_type = ?record.envelope.event_type(), "Ignoring event");
            return Ok(());
        }

        let event: RateChangeEvent = record.envelope.decode()?;
        self.broadcaster.broadcast(&event)?;
        Ok(())
    }
}
