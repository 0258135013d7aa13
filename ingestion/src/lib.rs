//! FxStream Ingestion
//!
//! The producer side of the event bus. Every scheduler tick runs the
//! pipeline once: fetch rates from the selected provider, validate and
//! enrich them, persist them, publish one rate change event per accepted
//! rate, then publish an ingestion status event. Ticks never overlap.
//! A separate pruner trims stored history older than the retention window.

pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
pub mod retention;
pub mod scheduler;
pub mod state;

pub use config::{IngestionConfig, PublisherConfig};
pub use metrics::{IngestionMetrics, IngestionMetricsSnapshot, SharedMetrics};
pub use pipeline::IngestionPipeline;
pub use publisher::EventPublisher;
pub use retention::HistoryPruner;
pub use scheduler::IngestionScheduler;
pub use state::SchedulerState;
