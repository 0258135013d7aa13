//! Rate provider trait and provider selection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fxstream_common::{CurrencyPair, FxStreamError, Rate, Result};
use tracing::{debug, info, instrument, warn};

/// Confidence reported by providers that do not override it.
pub const DEFAULT_PROVIDER_CONFIDENCE: f64 = 0.95;

/// A source of FX rates.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Whether the provider can currently serve requests.
    fn is_available(&self) -> bool;

    /// Quality of the data this provider returns.
    fn confidence_score(&self) -> f64 {
        DEFAULT_PROVIDER_CONFIDENCE
    }

    /// Fetch rates for the requested pairs.
    ///
    /// Pairs the provider cannot quote are left out of the result; that is
    /// not an error.
    async fn fetch_rates(&self, pairs: &[CurrencyPair]) -> Result<Vec<Rate>>;
}

/// Result of one provider call.
#[derive(Debug, Clone)]
pub struct ProviderFetch {
    pub provider_name: String,
    pub rates: Vec<Rate>,
    pub latency: Duration,
}

/// Holds the registered providers in priority order.
///
/// Selection is a single pass: the first provider reporting itself
/// available wins. Availability is checked on every fetch since it can
/// change at runtime.
#[derive(Default, Clone)]
pub struct ProviderFactory {
    providers: Vec<Arc<dyn RateProvider>>,
}

impl ProviderFactory {
    /// Create a factory from providers in priority order.
    pub fn new(providers: Vec<Arc<dyn RateProvider>>) -> Self {
        info!(count = providers.len(), "Provider factory initialized");
        Self { providers }
    }

    /// Append a provider with the lowest priority so far.
    pub fn register(&mut self, provider: Arc<dyn RateProvider>) {
        self.providers.push(provider);
    }

    /// Pick the first available provider.
    pub fn select(&self) -> Result<Arc<dyn RateProvider>> {
        match self.providers.iter().find(|p| p.is_available()) {
            Some(provider) => {
                debug!(provider = provider.name(), "Selected provider");
                Ok(provider.clone())
            }
            None => {
                warn!(registered = self.providers.len(), "No rate provider available");
                Err(FxStreamError::ProviderUnavailable)
            }
        }
    }

    /// Names of providers that are currently available.
    pub fn list_available(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Human-readable description of the selected provider.
    pub fn provider_info(&self) -> String {
        match self.select() {
            Ok(provider) => format!(
                "Provider: {}, Confidence: {:.2}",
                provider.name(),
                provider.confidence_score()
            ),
            Err(_) => "No provider available".to_string(),
        }
    }

    /// Fetch rates from the selected provider.
    ///
    /// Fails with `ProviderUnavailable` when nothing is available and with
    /// `DownstreamUnavailable` when the selected provider errors.
    #[instrument(skip(self, pairs), fields(pairs = pairs.len()))]
    pub async fn fetch_rates(&self, pairs: &[CurrencyPair]) -> Result<ProviderFetch> {
        let provider = self.select()?;
        let started = Instant::now();

        let rates = provider.fetch_rates(pairs).await.map_err(|e| match e {
            FxStreamError::DownstreamUnavailable(_) | FxStreamError::ProviderUnavailable => e,
            other => FxStreamError::DownstreamUnavailable(format!(
                "{}: {}",
                provider.name(),
                other
            )),
        })?;
        let latency = started.elapsed();

        info!(
            provider = provider.name(),
            fetched = rates.len(),
            requested = pairs.len(),
            latency_ms = latency.as_millis() as u64,
            "Fetched rates"
        );

        Ok(ProviderFetch {
            provider_name: provider.name().to_string(),
            rates,
            latency,
        })
    }
}

/// Mock rate provider for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateProvider {
    name: String,
    rates: dashmap::DashMap<CurrencyPair, Rate>,
    available: std::sync::atomic::AtomicBool,
    failing: std::sync::atomic::AtomicBool,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateProvider {
    /// Create a new mock provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: dashmap::DashMap::new(),
            available: std::sync::atomic::AtomicBool::new(true),
            failing: std::sync::atomic::AtomicBool::new(false),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Set the rate returned for its pair.
    pub fn set_rate(&self, rate: Rate) {
        self.rates.insert(rate.pair.clone(), rate);
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available
            .store(available, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make every fetch fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of fetches served.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateProvider for MockRateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn fetch_rates(&self, pairs: &[CurrencyPair]) -> Result<Vec<Rate>> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FxStreamError::Internal("mock provider failure".into()));
        }

        Ok(pairs
            .iter()
            .filter_map(|pair| self.rates.get(pair).map(|r| r.clone()))
            .collect())
    }
}
