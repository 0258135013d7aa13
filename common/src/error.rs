//! Error types for FxStream.

use crate::CurrencyPair;
use thiserror::Error;

/// Main error type for FxStream operations.
#[derive(Error, Debug, Clone)]
pub enum FxStreamError {
    /// No working rate source.
    #[error("No rate provider available")]
    ProviderUnavailable,

    /// A malformed rate was dropped.
    #[error("Rate rejected for {pair}: {reason}")]
    ValidationRejected { pair: String, reason: String },

    /// No cached or persisted value for the pair.
    #[error("Rate not found: {0}")]
    RateNotFound(CurrencyPair),

    /// Persistence or provider call failing.
    #[error("Downstream unavailable: {0}")]
    DownstreamUnavailable(String),

    /// Event bus write failed.
    #[error("Publish failed: {0}")]
    PublishFailure(String),

    /// Bad client frame.
    #[error("{0}")]
    MalformedClientMessage(String),

    /// Unknown session.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FxStreamError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FxStreamError::DownstreamUnavailable(_))
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxStreamError::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            FxStreamError::ValidationRejected { .. } => "VALIDATION_REJECTED",
            FxStreamError::RateNotFound(_) => "RATE_NOT_FOUND",
            FxStreamError::DownstreamUnavailable(_) => "DOWNSTREAM_UNAVAILABLE",
            FxStreamError::PublishFailure(_) => "PUBLISH_FAILURE",
            FxStreamError::MalformedClientMessage(_) => "MALFORMED_CLIENT_MESSAGE",
            FxStreamError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            FxStreamError::Serialization(_) => "SERIALIZATION_ERROR",
            FxStreamError::Configuration(_) => "CONFIGURATION_ERROR",
            FxStreamError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for FxStreamError {
    fn from(e: serde_json::Error) -> Self {
        FxStreamError::Serialization(e.to_string())
    }
}

/// Result type alias for FxStream operations.
pub type Result<T> = std::result::Result<T, FxStreamError>;
