//! Key-value cache with TTL and stale reads.
//!
//! Expired entries are not dropped on read: the read service falls back to
//! them when the persistence collaborator is down. [`InMemoryCache::evict_stale`]
//! removes entries that have been expired for longer than
//! [`CacheConfig::stale_retention`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use fxstream_common::{CurrencyPair, Rate};
use tracing::debug;

use crate::error::{CacheError, CacheResult};

/// A value stored under a cache key.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Rate(Rate),
    Rates(Vec<Rate>),
    Pairs(Vec<CurrencyPair>),
}

impl CacheValue {
    pub fn into_rate(self) -> Option<Rate> {
        match self {
            CacheValue::Rate(rate) => Some(rate),
            _ => None,
        }
    }

    pub fn into_rates(self) -> Option<Vec<Rate>> {
        match self {
            CacheValue::Rates(rates) => Some(rates),
            _ => None,
        }
    }

    pub fn into_pairs(self) -> Option<Vec<CurrencyPair>> {
        match self {
            CacheValue::Pairs(pairs) => Some(pairs),
            _ => None,
        }
    }
}

/// Cache backend used by the read path and the cache-refresh consumer.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value that is still within its TTL.
    async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>>;

    /// Get a value regardless of its TTL.
    async fn get_stale(&self, key: &str) -> CacheResult<Option<CacheValue>>;

    /// Store a value. Last write wins.
    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> CacheResult<()>;

    /// Remove a key. Returns whether it was present.
    async fn delete(&self, key: &str) -> CacheResult<bool>;
}

/// Configuration for the in-memory cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an expired entry stays available for stale reads.
    pub stale_retention: Duration,
    /// Entry count above which writes trigger an eviction sweep.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_retention: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CacheValue,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }

    fn is_retained(&self, retention: Duration) -> bool {
        self.stored_at.elapsed() < self.ttl + retention
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
}

/// Thread-safe in-process cache.
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    offline: AtomicBool,
}

impl InMemoryCache {
    /// Create a cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            offline: AtomicBool::new(false),
        }
    }

    /// Make every operation fail with [`CacheError::Unavailable`].
    ///
    /// Used to exercise the cache-down paths of the read service.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> CacheResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("cache offline".to_string()));
        }
        Ok(())
    }

    /// Drop entries past their stale retention window. Returns how many were removed.
    pub fn evict_stale(&self) -> usize {
        let before = self.entries.len();
        let retention = self.config.stale_retention;
        self.entries.retain(|_, entry| entry.is_retained(retention));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "Evicted stale cache entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.entries.len();
        let fresh = self.entries.iter().filter(|e| e.is_fresh()).count();

        CacheStats {
            total_entries: total,
            fresh_entries: fresh,
            stale_entries: total.saturating_sub(fresh),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>> {
        self.check_online()?;
        match self.entries.get(key) {
            Some(entry) if entry.is_fresh() => {
                debug!(key, "Cache hit");
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                debug!(key, "Cache entry expired");
                Ok(None)
            }
            None => {
                debug!(key, "Cache miss");
                Ok(None)
            }
        }
    }

    async fn get_stale(&self, key: &str) -> CacheResult<Option<CacheValue>> {
        self.check_online()?;
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> CacheResult<()> {
        self.check_online()?;
        if self.entries.len() >= self.config.max_entries {
            self.evict_stale();
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check_online()?;
        Ok(self.entries.remove(key).is_some())
    }
}
