//! Bounded window of recently handled event IDs.

use std::collections::{HashSet, VecDeque};

/// Remembers the last `capacity` event IDs. A capacity of 0 disables
/// duplicate suppression.
#[derive(Debug)]
pub struct DedupeWindow {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupeWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Remember an ID, evicting the oldest when full. Returns false if
    /// the ID was already present.
    pub fn insert(&mut self, id: String) -> bool {
        if self.capacity == 0 || self.seen.contains(&id) {
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(id.clone());
        self.order.push_back(id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_detected() {
        let mut window = DedupeWindow::new(10);
        assert!(window.insert("a".into()));
        assert!(!window.insert("a".into()));
        assert!(window.contains("a"));
    }

    #[test]
    fn test_oldest_evicted() {
        let mut window = DedupeWindow::new(2);
        window.insert("a".into());
        window.insert("b".into());
        window.insert("c".into());

        assert!(!window.contains("a"));
        assert!(window.contains("b"));
        assert!(window.contains("c"));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_zero_capacity_disables() {
        let mut window = DedupeWindow::new(0);
        assert!(!window.insert("a".into()));
        assert!(!window.contains("a"));
    }
}
