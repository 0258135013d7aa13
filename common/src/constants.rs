//! Shared names and defaults: topics, consumer groups, headers, cache keys.

use crate::CurrencyPair;
use std::time::Duration;

/// Topic carrying rate change events.
pub const RATE_UPDATES_TOPIC: &str = "fx-rates-updates";

/// Topic carrying ingestion status events.
pub const INGESTION_STATUS_TOPIC: &str = "fx-rates-ingestion";

/// Consumer group that fans events out to client sessions.
pub const WEBSOCKET_CONSUMER_GROUP: &str = "websocket-service";

/// Consumer group that keeps the rate cache in step with ingestion.
pub const CACHE_CONSUMER_GROUP: &str = "cache-updater";

/// Service name stamped on published events.
pub const INGESTION_SOURCE: &str = "rate-ingestion-service";

/// Transport header names.
pub mod headers {
    pub const EVENT_TYPE: &str = "event-type";
    pub const CORRELATION_ID: &str = "correlation-id";
    pub const SOURCE: &str = "source";
}

/// Cache key namespace.
pub mod cache_keys {
    use super::CurrencyPair;

    /// Key holding the list of supported pairs.
    pub const SUPPORTED_PAIRS: &str = "pairs:supported";

    /// Latest rate for a pair.
    pub fn rate(pair: &CurrencyPair) -> String {
        format!("rate:{}", pair)
    }

    /// Historical query results for a pair.
    pub fn history(pair: &CurrencyPair) -> String {
        format!("history:{}", pair)
    }
}

/// Default TTL of `rate:<pair>` entries.
pub const RATE_CACHE_TTL: Duration = Duration::from_secs(5);

/// Default TTL of `history:<pair>` entries.
pub const HISTORY_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default TTL of the supported pairs entry.
pub const SUPPORTED_PAIRS_TTL: Duration = Duration::from_secs(3600);

/// Pairs ingested when nothing else is configured.
pub const DEFAULT_PAIRS: [&str; 8] = [
    "EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "EURGBP", "EURJPY", "GBPJPY",
];

/// The default pairs as typed values.
pub fn default_pairs() -> Vec<CurrencyPair> {
    DEFAULT_PAIRS.iter().map(|p| CurrencyPair::new(*p)).collect()
}
