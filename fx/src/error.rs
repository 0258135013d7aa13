//! Errors local to the fx crate.

use fxstream_common::FxStreamError;
use thiserror::Error;

/// Cache backend failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The cache could not be reached.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

impl From<CacheError> for FxStreamError {
    fn from(e: CacheError) -> Self {
        FxStreamError::DownstreamUnavailable(e.to_string())
    }
}

/// Outcome of a call guarded by a circuit breaker.
#[derive(Debug, Error, Clone)]
pub enum CircuitError {
    /// The breaker rejected the call without running it.
    #[error("Circuit open for {0}")]
    Open(String),

    /// The call ran and failed.
    #[error(transparent)]
    Failed(#[from] FxStreamError),
}

impl From<CircuitError> for FxStreamError {
    fn from(e: CircuitError) -> Self {
        match e {
            CircuitError::Open(name) => {
                FxStreamError::DownstreamUnavailable(format!("circuit open for {}", name))
            }
            CircuitError::Failed(inner) => inner,
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
