//! Event bus errors.

use fxstream_common::FxStreamError;
use thiserror::Error;

/// Errors raised by the event bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Topic has not been created.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// Partition index out of range.
    #[error("Unknown partition {partition} on topic {topic}")]
    UnknownPartition { topic: String, partition: usize },

    /// A single event does not fit in an empty batch.
    #[error("Event of {size} bytes exceeds batch limit of {limit} bytes")]
    EventTooLarge { size: usize, limit: usize },

    /// Rejected configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The bus is no longer accepting writes.
    #[error("Event bus closed")]
    Closed,
}

impl From<BusError> for FxStreamError {
    fn from(e: BusError) -> Self {
        FxStreamError::PublishFailure(e.to_string())
    }
}

/// Result type alias for bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;
