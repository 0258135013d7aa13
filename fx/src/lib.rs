//! FxStream FX Core
//!
//! Everything between a rate source and a rate reader:
//!
//! - [`provider`]: the `RateProvider` trait and priority-ordered selection
//! - [`providers`]: built-in simulated and cross-rate providers
//! - [`validation`]: malformed-rate filtering and deviation flagging
//! - [`cache`]: TTL cache with stale reads
//! - [`circuit_breaker`] and [`retry`]: wrappers around downstream calls
//! - [`repository`]: the persistence collaborator contract
//! - [`read_service`]: cache-aside point, batch and historical reads
//! - [`cache_refresh`]: event handler for the cache-updater consumer group
//!
//! # Example
//!
//! ```rust,ignore
//! use fxstream_fx::{InMemoryCache, InMemoryRateRepository, RateReadService, ReadServiceConfig};
//!
//! let service = RateReadService::new(
//!     Arc::new(InMemoryCache::new()),
//!     Arc::new(InMemoryRateRepository::new()),
//!     ReadServiceConfig::default(),
//! );
//! let lookup = service.get_rate(&"EURUSD".into()).await?;
//! ```

pub mod cache;
pub mod cache_refresh;
pub mod circuit_breaker;
pub mod error;
pub mod provider;
pub mod providers;
pub mod read_service;
pub mod repository;
pub mod retry;
pub mod validation;

pub use cache::{CacheConfig, CacheStats, CacheStore, CacheValue, InMemoryCache};
pub use cache_refresh::{CacheRefreshHandler, RefreshMode};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{CacheError, CacheResult, CircuitError};
pub use provider::{ProviderFactory, ProviderFetch, RateProvider};
pub use providers::{CrossRateProvider, SimulatedMarketProvider};
pub use read_service::{BatchRateResult, RateLookup, RateReadService, ReadServiceConfig};
pub use repository::{InMemoryRateRepository, RateRepository};
pub use retry::RetryPolicy;
pub use validation::{RateValidator, ValidatedRate, ValidationConfig, ValidationOutcome};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
#[cfg(any(test, feature = "test-utils"))]
pub use repository::FailingRepository;
