//! Subscription registry.
//!
//! Tracks which sessions are connected and which pairs each one follows.
//! Both directions (pair → sessions, session → pairs) live under a single
//! lock so every operation updates them together.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use fxstream_common::{CurrencyPair, FxStreamError, Result, SessionId};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::session::SessionSink;

struct SessionEntry {
    sink: Arc<dyn SessionSink>,
    pairs: HashSet<CurrencyPair>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    subscribers: HashMap<CurrencyPair, HashSet<SessionId>>,
}

impl Inner {
    fn detach(&mut self, session_id: &SessionId, pair: &CurrencyPair) {
        if let Some(set) = self.subscribers.get_mut(pair) {
            set.remove(session_id);
            if set.is_empty() {
                self.subscribers.remove(pair);
            }
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_sessions: usize,
    /// Pairs with at least one subscriber.
    pub total_pairs: usize,
    pub subscribers_per_pair: BTreeMap<CurrencyPair, usize>,
}

/// Concurrent session and subscription registry.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session with no subscriptions. Re-registering an ID replaces
    /// its sink and keeps its subscriptions.
    pub fn register(&self, sink: Arc<dyn SessionSink>) {
        let session_id = sink.session_id().clone();
        let mut inner = self.inner.write();
        match inner.sessions.get_mut(&session_id) {
            Some(entry) => entry.sink = sink,
            None => {
                inner.sessions.insert(
                    session_id.clone(),
                    SessionEntry {
                        sink,
                        pairs: HashSet::new(),
                    },
                );
            }
        }
        info!(session_id = %session_id, total = inner.sessions.len(), "Session registered");
    }

    /// Remove a session and all its subscriptions. Returns false when unknown.
    pub fn unregister(&self, session_id: &SessionId) -> bool {
        self.remove_if(session_id, |_| true)
    }

    /// Remove `sink`'s session only while `sink` is still the registered
    /// sink for its ID. A session re-registered with a new sink is kept.
    pub fn evict(&self, sink: &Arc<dyn SessionSink>) -> bool {
        let target = Arc::as_ptr(sink) as *const ();
        self.remove_if(sink.session_id(), |current| {
            Arc::as_ptr(current) as *const () == target
        })
    }

    fn remove_if(
        &self,
        session_id: &SessionId,
        matches: impl FnOnce(&Arc<dyn SessionSink>) -> bool,
    ) -> bool {
        let mut inner = self.inner.write();
        if !inner
            .sessions
            .get(session_id)
            .is_some_and(|entry| matches(&entry.sink))
        {
            return false;
        }
        let Some(entry) = inner.sessions.remove(session_id) else {
            return false;
        };
        for pair in &entry.pairs {
            inner.detach(session_id, pair);
        }
        info!(
            session_id = %session_id,
            dropped_pairs = entry.pairs.len(),
            total = inner.sessions.len(),
            "Session unregistered"
        );
        true
    }

    /// Subscribe a session to pairs. Already-followed pairs are left alone.
    pub fn subscribe(&self, session_id: &SessionId, pairs: &[CurrencyPair]) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| FxStreamError::SessionNotFound(session_id.to_string()))?;
        entry.pairs.extend(pairs.iter().cloned());

        for pair in pairs {
            inner
                .subscribers
                .entry(pair.clone())
                .or_default()
                .insert(session_id.clone());
        }
        debug!(session_id = %session_id, pairs = ?pairs, "Subscribed");
        Ok(())
    }

    /// Unsubscribe a session from pairs, leaving its other pairs intact.
    pub fn unsubscribe(&self, session_id: &SessionId, pairs: &[CurrencyPair]) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| FxStreamError::SessionNotFound(session_id.to_string()))?;
        for pair in pairs {
            entry.pairs.remove(pair);
        }

        for pair in pairs {
            inner.detach(session_id, pair);
        }
        debug!(session_id = %session_id, pairs = ?pairs, "Unsubscribed");
        Ok(())
    }

    /// Sinks of every session subscribed to `pair`.
    pub fn subscribers_of(&self, pair: &CurrencyPair) -> Vec<Arc<dyn SessionSink>> {
        let inner = self.inner.read();
        inner
            .subscribers
            .get(pair)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.sessions.get(id).map(|e| e.sink.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn session(&self, session_id: &SessionId) -> Option<Arc<dyn SessionSink>> {
        self.inner.read().sessions.get(session_id).map(|e| e.sink.clone())
    }

    /// Pairs a session follows, sorted.
    pub fn subscriptions(&self, session_id: &SessionId) -> Option<Vec<CurrencyPair>> {
        self.inner.read().sessions.get(session_id).map(|e| {
            let mut pairs: Vec<_> = e.pairs.iter().cloned().collect();
            pairs.sort();
            pairs
        })
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        RegistryStats {
            total_sessions: inner.sessions.len(),
            total_pairs: inner.subscribers.len(),
            subscribers_per_pair: inner
                .subscribers
                .iter()
                .map(|(pair, ids)| (pair.clone(), ids.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChannelSession;

    fn setup_session(registry: &SubscriptionRegistry, id: &str) -> SessionId {
        let (session, _rx) = ChannelSession::new(SessionId::new(id), 8);
        registry.register(Arc::new(session));
        SessionId::new(id)
    }

    fn pairs(codes: &[&str]) -> Vec<CurrencyPair> {
        codes.iter().map(|c| CurrencyPair::new(*c)).collect()
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        let id = setup_session(&registry, "s-1");

        registry
            .subscribe(&id, &pairs(&["EURUSD", "GBPUSD", "USDJPY"]))
            .unwrap();
        registry.unsubscribe(&id, &pairs(&["GBPUSD"])).unwrap();

        assert_eq!(
            registry.subscriptions(&id).unwrap(),
            pairs(&["EURUSD", "USDJPY"])
        );
        assert!(registry.subscribers_of(&"GBPUSD".into()).is_empty());
        assert_eq!(registry.subscribers_of(&"EURUSD".into()).len(), 1);
    }

    #[test]
    fn test_unregister_clears_both_directions() {
        let registry = SubscriptionRegistry::new();
        let a = setup_session(&registry, "a");
        let b = setup_session(&registry, "b");
        registry.subscribe(&a, &pairs(&["EURUSD", "GBPUSD"])).unwrap();
        registry.subscribe(&b, &pairs(&["EURUSD"])).unwrap();

        assert!(registry.unregister(&a));
        assert!(!registry.unregister(&a));

        let stats = registry.stats();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_pairs, 1);
        assert_eq!(stats.subscribers_per_pair.get(&"EURUSD".into()), Some(&1));
        assert!(registry.session(&a).is_none());
    }

    #[test]
    fn test_evict_only_removes_matching_sink() {
        let registry = SubscriptionRegistry::new();
        let (old, _old_rx) = ChannelSession::new(SessionId::new("s-1"), 4);
        let old: Arc<dyn SessionSink> = Arc::new(old);
        registry.register(old.clone());
        registry
            .subscribe(&SessionId::new("s-1"), &pairs(&["EURUSD"]))
            .unwrap();

        let (new, _new_rx) = ChannelSession::new(SessionId::new("s-1"), 4);
        let new: Arc<dyn SessionSink> = Arc::new(new);
        registry.register(new.clone());

        assert!(!registry.evict(&old));
        assert_eq!(
            registry.subscriptions(&SessionId::new("s-1")).unwrap(),
            pairs(&["EURUSD"])
        );
        assert!(registry.evict(&new));
        assert_eq!(registry.session_count(), 0);
        assert!(registry.subscribers_of(&"EURUSD".into()).is_empty());
    }

    #[test]
    fn test_unknown_session_rejected() {
        let registry = SubscriptionRegistry::new();
        let err = registry
            .subscribe(&SessionId::new("ghost"), &pairs(&["EURUSD"]))
            .unwrap_err();
        assert_eq!(err.error_code(), "SESSION_NOT_FOUND");
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn test_concurrent_mutation_stays_consistent() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for round in 0..50 {
                        let id = setup_session(&registry, &format!("t{}-{}", i, round));
                        registry.subscribe(&id, &pairs(&["EURUSD", "GBPUSD"])).unwrap();
                        registry.unsubscribe(&id, &pairs(&["GBPUSD"])).unwrap();
                        if round % 2 == 0 {
                            registry.unregister(&id);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.total_sessions, 8 * 25);
        assert_eq!(stats.subscribers_per_pair.get(&"EURUSD".into()), Some(&200));
        assert!(!stats.subscribers_per_pair.contains_key(&"GBPUSD".into()));
    }
}
