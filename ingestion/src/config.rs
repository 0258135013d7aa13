//! Ingestion service configuration.

use std::time::Duration;

use fxstream_common::constants::{
    default_pairs, INGESTION_SOURCE, INGESTION_STATUS_TOPIC, RATE_UPDATES_TOPIC,
};
use fxstream_common::CurrencyPair;
use fxstream_eventbus::ProducerConfig;
use fxstream_fx::ValidationConfig;

/// Where and how events are published.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Topic for rate change events.
    pub topic: String,
    /// Topic for ingestion status events.
    pub status_topic: String,
    /// Maximum events per producer batch.
    pub max_batch_events: usize,
    /// Maximum encoded bytes per producer batch.
    pub max_batch_bytes: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        let producer = ProducerConfig::default();
        Self {
            topic: RATE_UPDATES_TOPIC.to_string(),
            status_topic: INGESTION_STATUS_TOPIC.to_string(),
            max_batch_events: producer.max_batch_events,
            max_batch_bytes: producer.max_batch_bytes,
        }
    }
}

impl PublisherConfig {
    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            max_batch_events: self.max_batch_events,
            max_batch_bytes: self.max_batch_bytes,
        }
    }
}

/// Main ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Pairs requested on every run.
    pub currency_pairs: Vec<CurrencyPair>,
    /// Time between scheduler ticks.
    pub schedule_interval: Duration,
    /// Service name stamped on published events.
    pub source_name: String,
    /// Provider label reported when no provider could be selected.
    pub provider_name: String,
    /// Stored rates older than this are pruned.
    pub history_retention: Duration,
    /// Time between pruning passes.
    pub prune_interval: Duration,
    pub validation: ValidationConfig,
    pub publisher: PublisherConfig,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            currency_pairs: default_pairs(),
            schedule_interval: Duration::from_secs(5),
            source_name: INGESTION_SOURCE.to_string(),
            provider_name: "auto".to_string(),
            history_retention: Duration::from_secs(24 * 3600),
            prune_interval: Duration::from_secs(600),
            validation: ValidationConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl IngestionConfig {
    /// Load configuration from environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(pairs) = std::env::var("FX_INGESTION_PAIRS") {
            config.currency_pairs = parse_pairs(&pairs);
        }

        if let Ok(secs) = std::env::var("FX_INGESTION_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                config.schedule_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(secs) = std::env::var("FX_HISTORY_RETENTION_SECS") {
            if let Ok(secs) = secs.parse() {
                config.history_retention = Duration::from_secs(secs);
            }
        }

        if let Ok(enabled) = std::env::var("FX_VALIDATION_ENABLED") {
            if let Ok(enabled) = enabled.parse() {
                config.validation.enabled = enabled;
            }
        }

        if let Ok(max) = std::env::var("FX_VALIDATION_MAX_DEVIATION_PERCENT") {
            if let Ok(max) = max.parse() {
                config.validation.max_deviation_percent = max;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.currency_pairs.is_empty() {
            return Err("At least one currency pair is required".to_string());
        }

        if let Some(bad) = self.currency_pairs.iter().find(|p| !p.is_valid()) {
            return Err(format!("Invalid currency pair: {}", bad));
        }

        if self.schedule_interval.is_zero() {
            return Err("Schedule interval cannot be 0".to_string());
        }

        if self.history_retention.is_zero() || self.prune_interval.is_zero() {
            return Err("History retention and prune interval cannot be 0".to_string());
        }

        if self.publisher.topic == self.publisher.status_topic {
            return Err("Rate and status topics must differ".to_string());
        }

        self.validation.validate()?;
        self.publisher.producer_config().validate()
    }
}

/// Parse a comma-separated pair list, skipping blanks.
pub fn parse_pairs(list: &str) -> Vec<CurrencyPair> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(CurrencyPair::new)
        .collect()
}
