//! FxStream Common Types
//!
//! This crate contains shared types used across the FxStream services,
//! including the rate data model, change events, identifiers and the
//! error taxonomy.

pub mod constants;
pub mod error;
pub mod event;
pub mod identifiers;
pub mod ingestion;
pub mod rate;
pub mod time;

pub use error::*;
pub use event::*;
pub use identifiers::*;
pub use ingestion::*;
pub use rate::*;
pub use time::*;
