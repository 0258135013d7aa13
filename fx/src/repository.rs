//! Persistence collaborator.
//!
//! The storage engine itself is external; the core only relies on the
//! [`RateRepository`] contract. [`InMemoryRateRepository`] backs the
//! simulator and the tests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fxstream_common::{CurrencyPair, FxStreamError, Rate, Result};
use tracing::debug;

/// Storage of rate history.
#[async_trait]
pub trait RateRepository: Send + Sync {
    /// Most recent rate for a pair by timestamp.
    async fn find_latest_by_pair(&self, pair: &CurrencyPair) -> Result<Option<Rate>>;

    /// Rates with `start <= timestamp <= end`, newest first, at most `limit`.
    async fn find_historical(
        &self,
        pair: &CurrencyPair,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Rate>>;

    /// Upsert by `id`. Sets `created_at` when missing and `updated_at` always.
    async fn save(&self, rate: Rate) -> Result<Rate>;

    /// Every pair with at least one stored rate.
    async fn list_all_pairs(&self) -> Result<Vec<CurrencyPair>>;

    /// Delete rates older than `cutoff`. Returns the number removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Rate history held in memory, indexed by pair and then by record ID.
#[derive(Default)]
pub struct InMemoryRateRepository {
    rates: DashMap<CurrencyPair, HashMap<String, Rate>>,
}

impl InMemoryRateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored rates across all pairs.
    pub fn len(&self) -> usize {
        self.rates.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateRepository for InMemoryRateRepository {
    async fn find_latest_by_pair(&self, pair: &CurrencyPair) -> Result<Option<Rate>> {
        Ok(self
            .rates
            .get(pair)
            .and_then(|rates| rates.values().max_by_key(|r| r.timestamp).cloned()))
    }

    async fn find_historical(
        &self,
        pair: &CurrencyPair,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Rate>> {
        let mut found: Vec<Rate> = match self.rates.get(pair) {
            Some(rates) => rates
                .values()
                .filter(|r| r.timestamp.is_some_and(|ts| ts >= start && ts <= end))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        found.truncate(limit);
        Ok(found)
    }

    async fn save(&self, mut rate: Rate) -> Result<Rate> {
        rate.ensure_id();
        let id = rate.id.clone().ok_or_else(|| FxStreamError::ValidationRejected {
            pair: rate.pair.to_string(),
            reason: "missing timestamp".to_string(),
        })?;

        let now = Utc::now();
        let mut rates = self.rates.entry(rate.pair.clone()).or_default();
        let created_at = rates.get(&id).and_then(|existing| existing.created_at);
        rate.created_at = created_at.or(rate.created_at).or(Some(now));
        rate.updated_at = Some(now);
        rates.insert(id.clone(), rate.clone());

        debug!(pair = %rate.pair, id = %id, "Saved rate");
        Ok(rate)
    }

    async fn list_all_pairs(&self) -> Result<Vec<CurrencyPair>> {
        let pairs: BTreeSet<CurrencyPair> = self
            .rates
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        Ok(pairs.into_iter().collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for mut entry in self.rates.iter_mut() {
            let before = entry.value().len();
            entry
                .value_mut()
                .retain(|_, r| r.timestamp.map_or(true, |ts| ts >= cutoff));
            removed += before - entry.value().len();
        }
        self.rates.retain(|_, rates| !rates.is_empty());
        Ok(removed)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use failing::FailingRepository;

#[cfg(any(test, feature = "test-utils"))]
mod failing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory repository that can be switched to fail every call.
    #[derive(Default)]
    pub struct FailingRepository {
        inner: InMemoryRateRepository,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl FailingRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Number of calls made, failed or not.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn inner(&self) -> &InMemoryRateRepository {
            &self.inner
        }

        fn check(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(FxStreamError::DownstreamUnavailable(
                    "repository offline".to_string(),
                ));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RateRepository for FailingRepository {
        async fn find_latest_by_pair(&self, pair: &CurrencyPair) -> Result<Option<Rate>> {
            self.check()?;
            self.inner.find_latest_by_pair(pair).await
        }

        async fn find_historical(
            &self,
            pair: &CurrencyPair,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Rate>> {
            self.check()?;
            self.inner.find_historical(pair, start, end, limit).await
        }

        async fn save(&self, rate: Rate) -> Result<Rate> {
            self.check()?;
            self.inner.save(rate).await
        }

        async fn list_all_pairs(&self) -> Result<Vec<CurrencyPair>> {
            self.check()?;
            self.inner.list_all_pairs().await
        }

        async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
            self.check()?;
            self.inner.delete_older_than(cutoff).await
        }
    }
}
