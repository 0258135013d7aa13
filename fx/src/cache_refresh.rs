//! Keeps the rate cache in step with published rate changes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fxstream_common::constants::{cache_keys, RATE_CACHE_TTL};
use fxstream_common::{RateChangeEvent, Result, RATE_UPDATED_EVENT_TYPE};
use fxstream_eventbus::{EventHandler, Record};
use tracing::debug;

use crate::cache::{CacheStore, CacheValue};

/// What to do with `rate:<pair>` when a rate changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Write the new rate with its own TTL.
    Refresh,
    /// Remove the entry so the next read goes to the repository.
    Invalidate,
}

/// Event handler for the cache-updater consumer group.
pub struct CacheRefreshHandler {
    cache: Arc<dyn CacheStore>,
    mode: RefreshMode,
    default_ttl: Duration,
}

impl CacheRefreshHandler {
    pub fn new(cache: Arc<dyn CacheStore>, mode: RefreshMode) -> Self {
        Self {
            cache,
            mode,
            default_ttl: RATE_CACHE_TTL,
        }
    }

    /// TTL used for rates that carry none.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

#[async_trait]
impl EventHandler for CacheRefreshHandler {
    async fn handle(&self, record: &Record) -> Result<()> {
        if record.envelope.event_type() != Some(RATE_UPDATED_EVENT_TYPE) {
            debug!(event_type = ?record.envelope.event_type(), "Ignoring event");
            return Ok(());
        }

        let event: RateChangeEvent = record.envelope.decode()?;
        let key = cache_keys::rate(event.pair());

        match self.mode {
            RefreshMode::Refresh => {
                let ttl = event
                    .rate
                    .ttl_seconds
                    .map(|secs| Duration::from_secs(u64::from(secs)))
                    .unwrap_or(self.default_ttl);
                self.cache
                    .set(&key, CacheValue::Rate(event.rate), ttl)
                    .await?;
                debug!(key = %key, ?ttl, "Refreshed cached rate");
            }
            RefreshMode::Invalidate => {
                let removed = self.cache.delete(&key).await?;
                debug!(key = %key, removed, "Invalidated cached rate");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use chrono::Utc;
    use fxstream_common::Rate;
    use fxstream_protocol::{EventEnvelope, Headers};
    use rust_decimal_macros::dec;

    fn make_record(envelope: EventEnvelope) -> Record {
        Record {
            partition: 0,
            offset: 0,
            sequence: 0,
            envelope,
            appended_at: Utc::now(),
        }
    }

    fn make_rate_record(pair: &str) -> Record {
        let rate = Rate::new(pair.into(), dec!(1.0850), "TEST").with_ttl(30);
        let event = RateChangeEvent::new(rate, None, None, "test");
        make_record(EventEnvelope::from_rate_event(&event).unwrap())
    }

    #[tokio::test]
    async fn test_refresh_writes_rate() {
        let cache = Arc::new(InMemoryCache::new());
        let handler = CacheRefreshHandler::new(cache.clone(), RefreshMode::Refresh);

        handler.handle(&make_rate_record("EURUSD")).await.unwrap();

        let cached = cache.get("rate:EURUSD").await.unwrap().and_then(CacheValue::into_rate);
        assert_eq!(cached.map(|r| r.rate), Some(dec!(1.0850)));
    }

    #[tokio::test]
    async fn test_default_ttl_applies_without_rate_ttl() {
        let cache = Arc::new(InMemoryCache::new());
        let handler = CacheRefreshHandler::new(cache.clone(), RefreshMode::Refresh)
            .with_default_ttl(Duration::ZERO);
        let rate = Rate::new("EURUSD".into(), dec!(1.0850), "TEST");
        let event = RateChangeEvent::new(rate, None, None, "test");

        handler
            .handle(&make_record(EventEnvelope::from_rate_event(&event).unwrap()))
            .await
            .unwrap();

        assert!(cache.get("rate:EURUSD").await.unwrap().is_none());
        assert!(cache.get_stale("rate:EURUSD").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = Arc::new(InMemoryCache::new());
        cache
            .set(
                "rate:EURUSD",
                CacheValue::Rate(Rate::new("EURUSD".into(), dec!(1.0), "OLD")),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let handler = CacheRefreshHandler::new(cache.clone(), RefreshMode::Invalidate);

        handler.handle(&make_rate_record("EURUSD")).await.unwrap();
        handler.handle(&make_rate_record("EURUSD")).await.unwrap();

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_other_events_ignored() {
        let cache = Arc::new(InMemoryCache::new());
        let handler = CacheRefreshHandler::new(cache.clone(), RefreshMode::Refresh);

        let record = make_record(EventEnvelope::new(None, Headers::new(), b"{}".to_vec()));
        handler.handle(&record).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_failure_surfaces() {
        let cache = Arc::new(InMemoryCache::new());
        cache.set_offline(true);
        let handler = CacheRefreshHandler::new(cache.clone(), RefreshMode::Refresh);

        let err = handler.handle(&make_rate_record("EURUSD")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
