//! Per-group read positions.

use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CheckpointKey {
    group: String,
    topic: String,
    partition: usize,
}

/// Checkpoints for every consumer group, keyed by topic and partition.
///
/// A checkpoint is the offset of the next record the group still has to
/// process. Checkpoints only move forward.
#[derive(Debug, Default)]
pub struct CheckpointStore {
    offsets: DashMap<CheckpointKey, u64>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that everything before `next_offset` has been handled.
    pub fn commit(&self, group: &str, topic: &str, partition: usize, next_offset: u64) {
        let key = CheckpointKey {
            group: group.to_string(),
            topic: topic.to_string(),
            partition,
        };
        self.offsets
            .entry(key)
            .and_modify(|current| *current = (*current).max(next_offset))
            .or_insert(next_offset);
    }

    /// Current checkpoint, if the group has committed on this partition.
    pub fn get(&self, group: &str, topic: &str, partition: usize) -> Option<u64> {
        let key = CheckpointKey {
            group: group.to_string(),
            topic: topic.to_string(),
            partition,
        };
        self.offsets.get(&key).map(|offset| *offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoints_never_move_back() {
        let store = CheckpointStore::new();
        store.commit("g", "t", 0, 5);
        store.commit("g", "t", 0, 3);
        assert_eq!(store.get("g", "t", 0), Some(5));
    }

    #[test]
    fn test_groups_are_independent() {
        let store = CheckpointStore::new();
        store.commit("websocket-service", "t", 0, 2);
        assert_eq!(store.get("cache-updater", "t", 0), None);
        assert_eq!(store.get("websocket-service", "t", 1), None);
    }
}
