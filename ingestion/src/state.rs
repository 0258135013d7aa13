//! Scheduler lifecycle state.

/// Operational state of the ingestion scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Created, no tick fired yet.
    Starting,
    /// Ticking and running the pipeline.
    Running,
    /// Shutdown requested; the in-flight run may still finish.
    ShuttingDown,
    /// Loop exited.
    Stopped,
}

impl SchedulerState {
    /// Check if ticks should still start runs.
    pub fn accepts_runs(&self) -> bool {
        matches!(self, SchedulerState::Starting | SchedulerState::Running)
    }

    /// Check if the scheduler is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SchedulerState::Stopped)
    }
}
