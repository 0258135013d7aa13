//! Rate types for FxStream.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A six-letter currency pair code such as `EURUSD`.
///
/// Construction never fails; use [`CurrencyPair::is_valid`] to check the
/// code before trusting [`from_currency`](Self::from_currency) and
/// [`to_currency`](Self::to_currency).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CurrencyPair(String);

impl CurrencyPair {
    /// Create a currency pair from its code. The code is upper-cased.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Create a currency pair from its two ISO 4217 legs.
    pub fn from_currencies(from: &str, to: &str) -> Self {
        Self::new(format!("{}{}", from, to))
    }

    /// Get the pair code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Check the pair is exactly six ASCII letters.
    pub fn is_valid(&self) -> bool {
        self.0.len() == 6 && self.0.chars().all(|c| c.is_ascii_alphabetic())
    }

    /// Source currency (first three letters).
    pub fn from_currency(&self) -> &str {
        self.0.get(..3).unwrap_or(&self.0)
    }

    /// Target currency (last three letters).
    pub fn to_currency(&self) -> &str {
        self.0.get(3..).unwrap_or("")
    }

    /// Whether either leg is the given currency.
    pub fn involves(&self, currency: &str) -> bool {
        self.from_currency() == currency || self.to_currency() == currency
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyPair {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CurrencyPair {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<CurrencyPair> for String {
    fn from(pair: CurrencyPair) -> Self {
        pair.0
    }
}

/// An FX rate quote as produced by a provider and enriched by validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rate {
    /// Deterministic record ID, `<pair>_<source>_<timestampMillis>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Currency pair, e.g. `EURUSD`.
    #[serde(rename = "currencyPair")]
    pub pair: CurrencyPair,
    /// Exchange rate value.
    pub rate: Decimal,
    /// Bid price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<Decimal>,
    /// Ask price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<Decimal>,
    /// When the provider published the rate.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Provider that produced the rate.
    pub source: String,
    /// Quality signal in `[0, 1]`.
    #[serde(default)]
    pub confidence_score: Option<f64>,
    /// Cache lifetime hint in seconds.
    #[serde(default)]
    pub ttl_seconds: Option<u32>,
    /// When the record was first stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the record was last stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Rate {
    /// Create a new rate quoted now.
    pub fn new(pair: CurrencyPair, rate: Decimal, source: impl Into<String>) -> Self {
        Self {
            id: None,
            pair,
            rate,
            bid: None,
            ask: None,
            timestamp: Some(Utc::now()),
            source: source.into(),
            confidence_score: None,
            ttl_seconds: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Set bid and ask prices.
    pub fn with_quote(mut self, bid: Decimal, ask: Decimal) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    /// Set the provider timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the confidence score.
    pub fn with_confidence(mut self, score: f64) -> Self {
        self.confidence_score = Some(score);
        self
    }

    /// Set the TTL hint.
    pub fn with_ttl(mut self, seconds: u32) -> Self {
        self.ttl_seconds = Some(seconds);
        self
    }

    /// Derive the record ID from pair, source and timestamp.
    ///
    /// Returns `None` when the timestamp is missing.
    pub fn derive_id(&self) -> Option<String> {
        self.timestamp.map(|ts| {
            format!("{}_{}_{}", self.pair, self.source, ts.timestamp_millis())
        })
    }

    /// Fill in the ID if not already set.
    pub fn ensure_id(&mut self) {
        if self.id.is_none() {
            self.id = self.derive_id();
        }
    }

    /// Mid-market rate: `(bid + ask) / 2` when both are present, else `rate`.
    pub fn mid_rate(&self) -> Decimal {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => (bid + ask) / Decimal::TWO,
            _ => self.rate,
        }
    }

    /// Difference between ask and bid, zero when either is missing.
    pub fn spread(&self) -> Decimal {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => ask - bid,
            _ => Decimal::ZERO,
        }
    }

    /// Check whether bid is above ask.
    pub fn is_crossed(&self) -> bool {
        matches!((self.bid, self.ask), (Some(bid), Some(ask)) if bid > ask)
    }
}
