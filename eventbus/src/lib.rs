//! FxStream Event Bus
//!
//! In-process partitioned publish/subscribe log. Producers append batches
//! of [`EventEnvelope`](fxstream_protocol::EventEnvelope)s to named topics;
//! consumer groups read each topic independently, each with its own
//! checkpoints.

pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod dedupe;
pub mod error;
pub mod log;
pub mod producer;

pub use checkpoint::CheckpointStore;
pub use config::{BusConfig, ConsumerConfig, ProducerConfig, StartPosition};
pub use consumer::{Consumer, ConsumerStats, ConsumerStatsSnapshot, EventHandler};
pub use error::{BusError, BusResult};
pub use log::{EventBus, Record, RecordPosition, Topic};
pub use producer::{EventBatch, Producer};
