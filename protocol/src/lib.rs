//! FxStream Protocol
//!
//! Wire formats shared by the producer and consumer sides:
//!
//! - [`EventEnvelope`]: the JSON body plus transport headers that travel
//!   on the event bus.
//! - [`ClientMessage`] / [`ServerMessage`]: JSON text frames exchanged with
//!   subscribed clients.

pub mod envelope;
pub mod messages;

pub use envelope::*;
pub use messages::*;
