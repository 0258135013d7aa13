//! Simulated subscriber connections.

use std::collections::HashSet;
use std::sync::Arc;

use fxstream_broadcast::ConnectionHandler;
use fxstream_common::{CurrencyPair, SessionId};
use fxstream_protocol::ClientMessage;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::ClientReport;

/// A client that subscribes once and then counts what it is sent.
pub struct SimulatedClient {
    session_id: SessionId,
    pairs: Vec<CurrencyPair>,
    frames: mpsc::Receiver<Arc<str>>,
}

impl SimulatedClient {
    /// Open a session, subscribe to `pairs` and ping once.
    pub fn connect(handler: &ConnectionHandler, pairs: Vec<CurrencyPair>) -> anyhow::Result<Self> {
        let (session_id, frames) = handler.open_session();

        let subscribe = ClientMessage::Subscribe {
            pairs: pairs.clone(),
        };
        handler.on_message(&session_id, &subscribe.to_json()?)?;
        handler.on_message(&session_id, &ClientMessage::Ping.to_json()?)?;

        debug!(session_id = %session_id, pairs = ?pairs, "Simulated client connected");
        Ok(Self {
            session_id,
            pairs,
            frames,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Read frames until the session is closed.
    pub fn spawn(self) -> JoinHandle<ClientReport> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> ClientReport {
        let subscribed: HashSet<&str> = self.pairs.iter().map(|p| p.code()).collect();
        let mut report = ClientReport::new(&self.session_id, &self.pairs);

        while let Some(frame) = self.frames.recv().await {
            report.frames += 1;
            let value: Value = match serde_json::from_str(&frame) {
                Ok(value) => value,
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "Unreadable frame");
                    report.errors += 1;
                    continue;
                }
            };

            match value["type"].as_str() {
                Some("rateUpdate") => {
                    let pair = value["event"]["rate"]["currencyPair"].as_str().unwrap_or("");
                    if subscribed.contains(pair) {
                        report.rate_updates += 1;
                    } else {
                        report.unexpected_updates += 1;
                    }
                }
                Some("error") => report.errors += 1,
                _ => {}
            }
        }

        report
    }
}

/// Choose between one and three distinct pairs.
pub fn pick_pairs<R: Rng>(rng: &mut R, universe: &[CurrencyPair]) -> Vec<CurrencyPair> {
    if universe.is_empty() {
        return Vec::new();
    }
    let count = rng.gen_range(1..=universe.len().min(3));
    universe.choose_multiple(rng, count).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxstream_broadcast::{BroadcastConfig, Broadcaster, SubscriptionRegistry};
    use fxstream_common::{Rate, RateChangeEvent};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal_macros::dec;

    fn make_test_event(pair: &str) -> RateChangeEvent {
        RateChangeEvent::new(Rate::new(pair.into(), dec!(1.0850), "TEST"), None, None, "svc")
    }

    #[tokio::test]
    async fn test_client_counts_updates() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let handler = ConnectionHandler::new(registry.clone(), BroadcastConfig::default());
        let broadcaster = Broadcaster::new(registry);

        let client = SimulatedClient::connect(&handler, vec!["EURUSD".into()]).unwrap();
        let session_id = client.session_id().clone();
        let task = client.spawn();

        broadcaster.broadcast(&make_test_event("EURUSD")).unwrap();
        broadcaster.broadcast(&make_test_event("GBPUSD")).unwrap();
        handler.on_disconnect(&session_id);

        let report = task.await.unwrap();
        // connected, subscribed, pong, one update
        assert_eq!(report.frames, 4);
        assert_eq!(report.rate_updates, 1);
        assert_eq!(report.unexpected_updates, 0);
        assert_eq!(report.errors, 0);
    }

    #[test]
    fn test_pick_pairs_distinct_and_bounded() {
        let universe: Vec<CurrencyPair> = ["EURUSD", "GBPUSD", "USDJPY", "AUDUSD"]
            .iter()
            .map(|p| (*p).into())
            .collect();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let picked = pick_pairs(&mut rng, &universe);
            let unique: HashSet<_> = picked.iter().collect();
            assert!((1..=3).contains(&picked.len()));
            assert_eq!(unique.len(), picked.len());
        }
        assert!(pick_pairs(&mut rng, &[]).is_empty());
    }
}
