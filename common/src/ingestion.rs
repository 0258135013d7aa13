//! Ingestion batch record and run state machine.

use crate::{BatchId, CurrencyPair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionStage {
    /// Fetching rates from the selected provider.
    Fetching,
    /// Running the validation engine.
    Validating,
    /// Writing accepted rates to the repository.
    Persisting,
    /// Publishing rate change events.
    Publishing,
    /// Run completed.
    Done,
    /// Run aborted.
    Failed,
}

impl IngestionStage {
    /// Check if this is a final stage.
    pub fn is_final(&self) -> bool {
        matches!(self, IngestionStage::Done | IngestionStage::Failed)
    }

    /// Get valid next stages from the current stage.
    pub fn valid_transitions(&self) -> &[IngestionStage] {
        match self {
            IngestionStage::Fetching => &[IngestionStage::Validating, IngestionStage::Failed],
            IngestionStage::Validating => &[IngestionStage::Persisting, IngestionStage::Failed],
            IngestionStage::Persisting => &[IngestionStage::Publishing, IngestionStage::Failed],
            IngestionStage::Publishing => &[IngestionStage::Done, IngestionStage::Failed],
            IngestionStage::Done => &[],
            IngestionStage::Failed => &[],
        }
    }

    /// Check if transition to the given stage is valid.
    pub fn can_transition_to(&self, next: IngestionStage) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionStatus {
    Success,
    Partial,
    Failed,
}

impl std::fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IngestionStatus::Success => "SUCCESS",
            IngestionStatus::Partial => "PARTIAL",
            IngestionStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Ephemeral record of one scheduler run. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionBatch {
    pub batch_id: BatchId,
    /// Provider that served the fetch, once known.
    pub provider_name: Option<String>,
    /// Pairs requested from the provider.
    pub requested: Vec<CurrencyPair>,
    pub stage: IngestionStage,
    pub fetched: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub persisted: usize,
    pub persist_failures: usize,
    pub published: usize,
    /// Set when the run reaches a final stage.
    pub status: Option<IngestionStatus>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IngestionBatch {
    /// Start a new batch in the `Fetching` stage.
    pub fn new(requested: Vec<CurrencyPair>) -> Self {
        Self {
            batch_id: BatchId::new(),
            provider_name: None,
            requested,
            stage: IngestionStage::Fetching,
            fetched: 0,
            accepted: 0,
            rejected: 0,
            persisted: 0,
            persist_failures: 0,
            published: 0,
            status: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Advance to the next stage.
    ///
    /// Moving to `Done` also settles the status: `Partial` when fewer rates
    /// were accepted than requested or some writes failed, else `Success`.
    pub fn transition_to(&mut self, next: IngestionStage) -> Result<(), InvalidTransition> {
        if !self.stage.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.stage,
                to: next,
            });
        }

        self.stage = next;

        if next == IngestionStage::Done {
            let shortfall = self.accepted < self.requested.len();
            self.status = Some(if shortfall || self.persist_failures > 0 {
                IngestionStatus::Partial
            } else {
                IngestionStatus::Success
            });
            self.finished_at = Some(Utc::now());
        }

        Ok(())
    }

    /// Abort the run.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        if self.stage.is_final() {
            return Err(InvalidTransition {
                from: self.stage,
                to: IngestionStage::Failed,
            });
        }

        self.stage = IngestionStage::Failed;
        self.status = Some(IngestionStatus::Failed);
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Run duration in milliseconds, measured to now while still running.
    pub fn duration_ms(&self) -> i64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds()
    }
}

/// Error when attempting an invalid stage transition.
#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub from: IngestionStage,
    pub to: IngestionStage,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid stage transition from {:?} to {:?}",
            self.from, self.to
        )
    }
}

impl std::error::Error for InvalidTransition {}
