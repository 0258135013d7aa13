//! Periodic pruning of stored rate history.

use std::sync::Arc;
use std::time::Duration;

use fxstream_common::{now, FxStreamError, Result};
use fxstream_fx::RateRepository;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Deletes rates older than the retention window on a fixed interval.
pub struct HistoryPruner {
    repository: Arc<dyn RateRepository>,
    retention: chrono::Duration,
    interval: Duration,
}

impl HistoryPruner {
    pub fn new(
        repository: Arc<dyn RateRepository>,
        retention: Duration,
        interval: Duration,
    ) -> Result<Self> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| FxStreamError::Configuration(format!("history retention: {e}")))?;
        Ok(Self {
            repository,
            retention,
            interval,
        })
    }

    /// Delete everything older than the retention window once.
    pub async fn prune_once(&self) -> Result<usize> {
        let cutoff = now() - self.retention;
        let removed = self.repository.delete_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff, "Pruned rate history");
        } else {
            debug!(cutoff = %cutoff, "Nothing to prune");
        }
        Ok(removed)
    }

    /// Prune on every tick until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.prune_once().await {
                        warn!(error = %e, "History pruning failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("History pruner stopped");
    }
}
