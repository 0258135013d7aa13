//! Event types carried on the event bus.

use crate::{BatchId, CurrencyPair, EventId, IngestionBatch, IngestionStatus, Rate};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Event type tag for rate updates.
pub const RATE_UPDATED_EVENT_TYPE: &str = "FX_RATE_UPDATED";

/// An accepted rate, published once per ingestion and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateChangeEvent {
    /// Idempotency key for consumers.
    pub event_id: EventId,
    /// Always [`RATE_UPDATED_EVENT_TYPE`] for events built by [`RateChangeEvent::new`].
    pub event_type: String,
    /// The accepted rate.
    pub rate: Rate,
    /// Last accepted rate for the same pair, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_rate: Option<Rate>,
    /// Signed change versus `previous_rate`, in percent.
    #[serde(
        rename = "changePercentage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub change_percent: Option<Decimal>,
    /// When the event was created.
    pub event_timestamp: DateTime<Utc>,
    /// Service that created the event.
    pub source: String,
}

impl RateChangeEvent {
    /// Create a new rate change event with a fresh event ID.
    pub fn new(
        rate: Rate,
        previous_rate: Option<Rate>,
        change_percent: Option<Decimal>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: RATE_UPDATED_EVENT_TYPE.to_string(),
            rate,
            previous_rate,
            change_percent,
            event_timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// Pair the event is about.
    pub fn pair(&self) -> &CurrencyPair {
        &self.rate.pair
    }
}

/// Summary of one ingestion run, published for observability only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStatusEvent {
    pub event_id: EventId,
    pub batch_id: BatchId,
    pub provider_name: Option<String>,
    /// Number of rates accepted by validation.
    pub rate_count: usize,
    pub currency_pairs: Vec<CurrencyPair>,
    pub ingested_at: DateTime<Utc>,
    pub status: IngestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub processing_time_ms: i64,
}

impl IngestionStatusEvent {
    /// Build the status event for a finished (or failed) batch.
    pub fn from_batch(batch: &IngestionBatch) -> Self {
        Self {
            event_id: EventId::new(),
            batch_id: batch.batch_id,
            provider_name: batch.provider_name.clone(),
            rate_count: batch.accepted,
            currency_pairs: batch.requested.clone(),
            ingested_at: batch.finished_at.unwrap_or_else(Utc::now),
            status: batch.status.unwrap_or(IngestionStatus::Failed),
            error_message: batch.error.clone(),
            processing_time_ms: batch.duration_ms(),
        }
    }
}
