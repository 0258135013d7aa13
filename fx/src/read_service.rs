//! Rate read service: cache-aside reads guarded by a circuit breaker.
//!
//! A point read checks `rate:<pair>` first. On a miss the repository is
//! queried through [`RetryPolicy`] inside the [`CircuitBreaker`], and a hit
//! is written through to the cache. When the repository is failing or the
//! circuit is open, the last cached value is served regardless of its TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use fxstream_common::constants::{
    cache_keys, HISTORY_CACHE_TTL, RATE_CACHE_TTL, SUPPORTED_PAIRS_TTL,
};
use fxstream_common::{CurrencyPair, FxStreamError, Rate, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStore, CacheValue};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::CircuitError;
use crate::repository::RateRepository;
use crate::retry::RetryPolicy;

/// Message attached to lookups served from stale cache.
pub const DEGRADED_MESSAGE: &str = "Service degraded - returning cached data";

/// Configuration for the read service.
#[derive(Debug, Clone)]
pub struct ReadServiceConfig {
    /// TTL for write-through of `rate:<pair>`.
    pub rate_ttl: Duration,
    /// TTL for cached historical queries.
    pub history_ttl: Duration,
    /// TTL for the supported pairs list.
    pub pairs_ttl: Duration,
    /// Window used when a historical query gives no start.
    pub history_window: chrono::Duration,
    /// Row limit used when a historical query gives none.
    pub history_limit: usize,
    /// Breaker around repository calls.
    pub breaker: CircuitBreakerConfig,
    /// Retry inside the breaker.
    pub retry: RetryPolicy,
}

impl Default for ReadServiceConfig {
    fn default() -> Self {
        Self {
            rate_ttl: RATE_CACHE_TTL,
            history_ttl: HISTORY_CACHE_TTL,
            pairs_ttl: SUPPORTED_PAIRS_TTL,
            history_window: chrono::Duration::hours(24),
            history_limit: 1000,
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ReadServiceConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.rate_ttl.is_zero() {
            return Err("rate_ttl must be greater than 0".to_string());
        }
        if self.history_limit == 0 {
            return Err("history_limit must be greater than 0".to_string());
        }
        self.breaker.validate()?;
        self.retry.validate()
    }
}

/// A rate returned by a point read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLookup {
    pub rate: Rate,
    pub from_cache: bool,
    /// Served from stale cache while the repository is unavailable.
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RateLookup {
    fn fresh(rate: Rate, from_cache: bool) -> Self {
        Self {
            rate,
            from_cache,
            degraded: false,
            message: None,
        }
    }

    fn degraded(rate: Rate) -> Self {
        Self {
            rate,
            from_cache: true,
            degraded: true,
            message: Some(DEGRADED_MESSAGE.to_string()),
        }
    }
}

/// Result of a batch read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRateResult {
    pub succeeded: Vec<RateLookup>,
    pub failed: Vec<CurrencyPair>,
    pub total_requested: usize,
    pub retrieved_at: DateTime<Utc>,
    #[serde(skip)]
    pub latency: Duration,
}

/// Serves point, batch and historical rate queries.
pub struct RateReadService {
    cache: Arc<dyn CacheStore>,
    repository: Arc<dyn RateRepository>,
    breaker: CircuitBreaker,
    config: ReadServiceConfig,
}

impl RateReadService {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        repository: Arc<dyn RateRepository>,
        config: ReadServiceConfig,
    ) -> Self {
        Self {
            cache,
            repository,
            breaker: CircuitBreaker::new("rate-repository", config.breaker.clone()),
            config,
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Latest rate for a pair.
    #[instrument(skip(self), fields(pair = %pair))]
    pub async fn get_rate(&self, pair: &CurrencyPair) -> Result<RateLookup> {
        let key = cache_keys::rate(pair);

        if let Some(rate) = self.cache_get(&key).await.and_then(CacheValue::into_rate) {
            debug!("Rate served from cache");
            return Ok(RateLookup::fresh(rate, true));
        }

        let found = self
            .breaker
            .call(|| {
                self.config
                    .retry
                    .run("find_latest_by_pair", || self.repository.find_latest_by_pair(pair))
            })
            .await;

        match found {
            Ok(Some(rate)) => {
                self.cache_set(&key, CacheValue::Rate(rate.clone()), self.config.rate_ttl)
                    .await;
                Ok(RateLookup::fresh(rate, false))
            }
            Ok(None) => Err(FxStreamError::RateNotFound(pair.clone())),
            Err(CircuitError::Failed(e)) if !e.is_retryable() => Err(e),
            Err(e) => self.stale_fallback(pair, &key, e).await,
        }
    }

    async fn stale_fallback(
        &self,
        pair: &CurrencyPair,
        key: &str,
        cause: CircuitError,
    ) -> Result<RateLookup> {
        let stale = match self.cache.get_stale(key).await {
            Ok(value) => value.and_then(CacheValue::into_rate),
            Err(e) => {
                warn!(key, error = %e, "Cache unavailable during fallback");
                None
            }
        };

        match stale {
            Some(rate) => {
                warn!(pair = %pair, cause = %cause, "Serving stale rate");
                Ok(RateLookup::degraded(rate))
            }
            None => {
                warn!(pair = %pair, cause = %cause, "No cached rate to fall back to");
                Err(FxStreamError::RateNotFound(pair.clone()))
            }
        }
    }

    /// Read several pairs independently. One pair failing never fails the batch.
    #[instrument(skip(self, pairs), fields(pairs = pairs.len()))]
    pub async fn get_batch(&self, pairs: &[CurrencyPair]) -> BatchRateResult {
        let started = Instant::now();
        let results = join_all(pairs.iter().map(|pair| self.get_rate(pair))).await;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (pair, result) in pairs.iter().zip(results) {
            match result {
                Ok(lookup) => succeeded.push(lookup),
                Err(e) => {
                    debug!(pair = %pair, error = %e, "Batch entry failed");
                    failed.push(pair.clone());
                }
            }
        }

        info!(
            succeeded = succeeded.len(),
            failed = failed.len(),
            "Batch read completed"
        );

        BatchRateResult {
            succeeded,
            failed,
            total_requested: pairs.len(),
            retrieved_at: Utc::now(),
            latency: started.elapsed(),
        }
    }

    /// Historical rates, newest first.
    ///
    /// `start` defaults to 24 hours before `end`, `end` to now. Only queries
    /// with an explicit window are cached, since a default window moves.
    #[instrument(skip(self), fields(pair = %pair))]
    pub async fn get_historical(
        &self,
        pair: &CurrencyPair,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Rate>> {
        let limit = limit.unwrap_or(self.config.history_limit);
        let key = match (start, end) {
            (Some(start), Some(end)) => Some(format!(
                "{}:{}:{}:{}",
                cache_keys::history(pair),
                start.timestamp_millis(),
                end.timestamp_millis(),
                limit
            )),
            _ => None,
        };

        if let Some(key) = &key {
            if let Some(rates) = self.cache_get(key).await.and_then(CacheValue::into_rates) {
                return Ok(rates);
            }
        }

        let end = end.unwrap_or_else(Utc::now);
        let start = start.unwrap_or(end - self.config.history_window);

        let rates = self
            .breaker
            .call(|| {
                self.config.retry.run("find_historical", || {
                    self.repository.find_historical(pair, start, end, limit)
                })
            })
            .await?;

        if let Some(key) = &key {
            self.cache_set(key, CacheValue::Rates(rates.clone()), self.config.history_ttl)
                .await;
        }
        Ok(rates)
    }

    /// Every pair with stored rates.
    #[instrument(skip(self))]
    pub async fn get_supported_pairs(&self) -> Result<Vec<CurrencyPair>> {
        let key = cache_keys::SUPPORTED_PAIRS;
        if let Some(pairs) = self.cache_get(key).await.and_then(CacheValue::into_pairs) {
            return Ok(pairs);
        }

        let pairs = self
            .breaker
            .call(|| {
                self.config
                    .retry
                    .run("list_all_pairs", || self.repository.list_all_pairs())
            })
            .await?;

        if !pairs.is_empty() {
            self.cache_set(key, CacheValue::Pairs(pairs.clone()), self.config.pairs_ttl)
                .await;
        }
        Ok(pairs)
    }

    /// Drop the cached rate for a pair. Returns whether an entry was removed.
    pub async fn invalidate(&self, pair: &CurrencyPair) -> Result<bool> {
        let removed = self.cache.delete(&cache_keys::rate(pair)).await?;
        debug!(pair = %pair, removed, "Invalidated cached rate");
        Ok(removed)
    }

    async fn cache_get(&self, key: &str) -> Option<CacheValue> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn cache_set(&self, key: &str, value: CacheValue, ttl: Duration) {
        if let Err(e) = self.cache.set(key, value, ttl).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }
}
