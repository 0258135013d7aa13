//! Event envelope: JSON body plus transport headers.

use fxstream_common::constants::headers;
use fxstream_common::{IngestionStatusEvent, RateChangeEvent, Result};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// Event type header value for ingestion status events.
pub const INGESTION_STATUS_EVENT_TYPE: &str = "FX_INGESTION_STATUS";

/// Transport headers attached to an event.
pub type Headers = BTreeMap<String, String>;

/// A serialized event as it travels on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Partition key. Events with the same key keep their relative order.
    pub key: Option<String>,
    pub headers: Headers,
    /// UTF-8 JSON body.
    pub body: Vec<u8>,
}

impl EventEnvelope {
    /// Create an envelope from raw parts.
    pub fn new(key: Option<String>, headers: Headers, body: Vec<u8>) -> Self {
        Self { key, headers, body }
    }

    /// Encode a rate change event, keyed by pair.
    pub fn from_rate_event(event: &RateChangeEvent) -> Result<Self> {
        let body = serde_json::to_vec(event)?;
        let mut hdrs = Headers::new();
        hdrs.insert(headers::EVENT_TYPE.to_string(), event.event_type.clone());
        hdrs.insert(
            headers::CORRELATION_ID.to_string(),
            event.event_id.to_string(),
        );
        hdrs.insert(headers::SOURCE.to_string(), event.source.clone());

        Ok(Self::new(Some(event.pair().to_string()), hdrs, body))
    }

    /// Encode an ingestion status event, keyed by batch.
    pub fn from_status_event(event: &IngestionStatusEvent, source: &str) -> Result<Self> {
        let body = serde_json::to_vec(event)?;
        let mut hdrs = Headers::new();
        hdrs.insert(
            headers::EVENT_TYPE.to_string(),
            INGESTION_STATUS_EVENT_TYPE.to_string(),
        );
        hdrs.insert(
            headers::CORRELATION_ID.to_string(),
            event.event_id.to_string(),
        );
        hdrs.insert(headers::SOURCE.to_string(), source.to_string());

        Ok(Self::new(Some(event.batch_id.to_string()), hdrs, body))
    }

    /// Decode the body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Look up a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The `event-type` header.
    pub fn event_type(&self) -> Option<&str> {
        self.header(headers::EVENT_TYPE)
    }

    /// The `correlation-id` header (the event ID).
    pub fn correlation_id(&self) -> Option<&str> {
        self.header(headers::CORRELATION_ID)
    }

    /// Approximate encoded size, used for producer batch limits.
    pub fn size_bytes(&self) -> usize {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        self.body.len() + headers + self.key.as_ref().map_or(0, String::len)
    }
}
