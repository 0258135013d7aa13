//! Time helpers for FxStream.

use chrono::{DateTime, Utc};

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    now().timestamp_millis()
}
