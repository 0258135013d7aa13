//! Single-flight scheduler for the ingestion pipeline.
//!
//! Each tick spawns a run unless one is still in progress, in which case
//! the tick is logged and dropped. Ticks are never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fxstream_common::IngestionBatch;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument, warn};

use crate::pipeline::IngestionPipeline;
use crate::state::SchedulerState;

/// Clears the in-progress flag when a run ends, however it ends.
struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Drives [`IngestionPipeline::run_once`] on a fixed interval.
pub struct IngestionScheduler {
    pipeline: Arc<IngestionPipeline>,
    interval: Duration,
    running: Arc<AtomicBool>,
    state: RwLock<SchedulerState>,
}

impl IngestionScheduler {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        let interval = pipeline.config().schedule_interval;
        Self::with_interval(pipeline, interval)
    }

    pub fn with_interval(pipeline: Arc<IngestionPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            state: RwLock::new(SchedulerState::Starting),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.read()
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start a run in the background unless one is already active.
    ///
    /// Returns `None` when the tick was skipped.
    pub fn try_trigger(&self) -> Option<JoinHandle<IngestionBatch>> {
        if !self.state().accepts_runs() {
            return None;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Previous ingestion run still in progress, skipping tick");
            self.pipeline.metrics().tick_skipped();
            return None;
        }

        let guard = RunGuard {
            flag: self.running.clone(),
        };
        let pipeline = self.pipeline.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            pipeline.run_once().await
        }))
    }

    /// Tick until `shutdown` turns true, then wait for the in-flight run.
    #[instrument(skip(self, shutdown), fields(interval_ms = self.interval.as_millis() as u64))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        *self.state.write() = SchedulerState::Running;
        info!("Ingestion scheduler started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<IngestionBatch>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(handle) = self.try_trigger() {
                        in_flight = Some(handle);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        *self.state.write() = SchedulerState::ShuttingDown;
        info!("Ingestion scheduler stopping");

        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                warn!(error = %e, "Ingestion run task failed");
            }
        }

        *self.state.write() = SchedulerState::Stopped;
        info!("Ingestion scheduler stopped");
    }
}
