//! Event bus configuration.

/// Bus-wide settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Partitions created per topic.
    pub partitions: usize,
    /// Records kept per partition before the oldest are dropped.
    pub retention_records: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            retention_records: 10_000,
        }
    }
}

impl BusConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.partitions == 0 {
            return Err("partitions must be at least 1".to_string());
        }
        if self.retention_records == 0 {
            return Err("retention_records must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Producer batching limits.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Maximum events per batch.
    pub max_batch_events: usize,
    /// Maximum encoded bytes per batch.
    pub max_batch_bytes: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_batch_events: 100,
            max_batch_bytes: 256 * 1024,
        }
    }
}

impl ProducerConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_events == 0 {
            return Err("max_batch_events must be at least 1".to_string());
        }
        if self.max_batch_bytes == 0 {
            return Err("max_batch_bytes must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Where a group with no checkpoint starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Oldest retained record.
    Earliest,
    /// Only records appended after the consumer starts.
    Latest,
}

/// Consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of recent event IDs remembered for duplicate suppression.
    pub dedupe_window: usize,
    /// Records read per partition per poll.
    pub max_poll_records: usize,
    pub start_position: StartPosition,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            dedupe_window: 10_000,
            max_poll_records: 500,
            start_position: StartPosition::Earliest,
        }
    }
}

impl ConsumerConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_poll_records == 0 {
            return Err("max_poll_records must be at least 1".to_string());
        }
        Ok(())
    }
}
