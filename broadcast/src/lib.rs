//! Subscription registry and rate update fan-out.
//!
//! Clients connect through a [`ConnectionHandler`], subscribe to currency
//! pairs, and receive `rateUpdate` frames pushed by the [`Broadcaster`].
//! [`BroadcastEventHandler`] plugs the broadcaster into the websocket
//! consumer group of the event bus.

pub mod broadcaster;
pub mod config;
pub mod handler;
pub mod registry;
pub mod session;

pub use broadcaster::{
    BroadcastEventHandler, BroadcastOutcome, BroadcastStats, BroadcastStatsSnapshot, Broadcaster,
};
pub use config::BroadcastConfig;
pub use handler::ConnectionHandler;
pub use registry::{RegistryStats, SubscriptionRegistry};
pub use session::{ChannelSession, SendError, SessionSink};
