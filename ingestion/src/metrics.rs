//! Metrics collection for ingestion monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fxstream_common::{IngestionBatch, IngestionStatus};

/// Ingestion metrics.
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Runs started by the scheduler.
    pub runs_started: AtomicU64,
    /// Runs finished with SUCCESS.
    pub runs_succeeded: AtomicU64,
    /// Runs finished with PARTIAL.
    pub runs_partial: AtomicU64,
    /// Runs finished with FAILED.
    pub runs_failed: AtomicU64,
    /// Ticks dropped because a run was in progress.
    pub ticks_skipped: AtomicU64,
    pub rates_fetched: AtomicU64,
    pub rates_accepted: AtomicU64,
    pub rates_rejected: AtomicU64,
    pub rates_persisted: AtomicU64,
    pub persist_failures: AtomicU64,
    pub events_published: AtomicU64,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the counts of a finished batch.
    pub fn record_batch(&self, batch: &IngestionBatch) {
        let outcome = match batch.status {
            Some(IngestionStatus::Success) => &self.runs_succeeded,
            Some(IngestionStatus::Partial) => &self.runs_partial,
            Some(IngestionStatus::Failed) | None => &self.runs_failed,
        };
        outcome.fetch_add(1, Ordering::Relaxed);

        for (counter, value) in [
            (&self.rates_fetched, batch.fetched),
            (&self.rates_accepted, batch.accepted),
            (&self.rates_rejected, batch.rejected),
            (&self.rates_persisted, batch.persisted),
            (&self.persist_failures, batch.persist_failures),
            (&self.events_published, batch.published),
        ] {
            counter.fetch_add(value as u64, Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> IngestionMetricsSnapshot {
        IngestionMetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_partial: self.runs_partial.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            rates_fetched: self.rates_fetched.load(Ordering::Relaxed),
            rates_accepted: self.rates_accepted.load(Ordering::Relaxed),
            rates_rejected: self.rates_rejected.load(Ordering::Relaxed),
            rates_persisted: self.rates_persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("runs_started", "Ingestion runs started", s.runs_started),
            ("runs_succeeded", "Ingestion runs finished with SUCCESS", s.runs_succeeded),
            ("runs_partial", "Ingestion runs finished with PARTIAL", s.runs_partial),
            ("runs_failed", "Ingestion runs finished with FAILED", s.runs_failed),
            ("ticks_skipped", "Scheduler ticks skipped while a run was active", s.ticks_skipped),
            ("rates_fetched", "Rates returned by providers", s.rates_fetched),
            ("rates_accepted", "Rates accepted by validation", s.rates_accepted),
            ("rates_rejected", "Rates rejected by validation", s.rates_rejected),
            ("rates_persisted", "Rates written to the repository", s.rates_persisted),
            ("persist_failures", "Repository writes that failed", s.persist_failures),
            ("events_published", "Rate change events published", s.events_published),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP fxstream_ingestion_{name} {help}\n\
                 # TYPE fxstream_ingestion_{name} counter\n\
                 fxstream_ingestion_{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionMetricsSnapshot {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_partial: u64,
    pub runs_failed: u64,
    pub ticks_skipped: u64,
    pub rates_fetched: u64,
    pub rates_accepted: u64,
    pub rates_rejected: u64,
    pub rates_persisted: u64,
    pub persist_failures: u64,
    pub events_published: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<IngestionMetrics>;
