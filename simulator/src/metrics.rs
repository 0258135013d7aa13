//! Simulation metrics and the end-of-run summary.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write;
use std::time::Duration;

use fxstream_broadcast::{BroadcastStatsSnapshot, RegistryStats};
use fxstream_common::{CurrencyPair, SessionId};
use fxstream_ingestion::IngestionMetricsSnapshot;
use serde::Serialize;

/// Rolling window of latency samples, in microseconds.
#[derive(Debug, Clone)]
pub struct LatencySamples {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencySamples {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record(&mut self, latency: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(latency.as_micros() as u64);
    }

    pub fn average_us(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let sum: u64 = self.samples.iter().sum();
        sum / self.samples.len() as u64
    }

    pub fn percentile_us(&self, percentile: usize) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for LatencySamples {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// What one simulated client saw.
#[derive(Debug, Clone, Serialize)]
pub struct ClientReport {
    pub session_id: String,
    pub pairs: Vec<String>,
    pub frames: u64,
    pub rate_updates: u64,
    /// Updates for pairs the client never subscribed to. Always zero when
    /// routing is correct.
    pub unexpected_updates: u64,
    pub errors: u64,
}

impl ClientReport {
    pub fn new(session_id: &SessionId, pairs: &[CurrencyPair]) -> Self {
        Self {
            session_id: session_id.to_string(),
            pairs: pairs.iter().map(|p| p.code().to_string()).collect(),
            frames: 0,
            rate_updates: 0,
            unexpected_updates: 0,
            errors: 0,
        }
    }
}

/// Read service results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadReport {
    pub queries: u64,
    pub from_cache: u64,
    pub from_repository: u64,
    pub degraded: u64,
    pub failed: u64,
    pub avg_latency_us: u64,
    pub p99_latency_us: u64,
    pub history_points: usize,
    pub supported_pairs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionTotals {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_partial: u64,
    pub runs_failed: u64,
    pub ticks_skipped: u64,
    pub rates_accepted: u64,
    pub rates_rejected: u64,
    pub rates_persisted: u64,
    pub events_published: u64,
}

impl From<IngestionMetricsSnapshot> for IngestionTotals {
    fn from(s: IngestionMetricsSnapshot) -> Self {
        Self {
            runs_started: s.runs_started,
            runs_succeeded: s.runs_succeeded,
            runs_partial: s.runs_partial,
            runs_failed: s.runs_failed,
            ticks_skipped: s.ticks_skipped,
            rates_accepted: s.rates_accepted,
            rates_rejected: s.rates_rejected,
            rates_persisted: s.rates_persisted,
            events_published: s.events_published,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryTotals {
    pub sessions: usize,
    pub pairs: usize,
    pub subscribers_per_pair: BTreeMap<String, usize>,
    pub frames_sent: u64,
    pub sessions_evicted: u64,
}

impl RegistryTotals {
    pub fn new(stats: RegistryStats, broadcast: BroadcastStatsSnapshot) -> Self {
        Self {
            sessions: stats.total_sessions,
            pairs: stats.total_pairs,
            subscribers_per_pair: stats
                .subscribers_per_pair
                .into_iter()
                .map(|(pair, count)| (pair.code().to_string(), count))
                .collect(),
            frames_sent: broadcast.frames_sent,
            sessions_evicted: broadcast.sessions_evicted,
        }
    }
}

/// Everything printed at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub elapsed_ms: u64,
    pub ingestion: IngestionTotals,
    pub registry: RegistryTotals,
    pub reads: ReadReport,
    pub clients: Vec<ClientReport>,
}

impl SimulationSummary {
    pub fn rate_updates_received(&self) -> u64 {
        self.clients.iter().map(|c| c.rate_updates).sum()
    }

    /// Human-readable rendering.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let i = &self.ingestion;
        let r = &self.registry;
        let q = &self.reads;

        let _ = writeln!(out, "Simulation finished in {} ms", self.elapsed_ms);
        let _ = writeln!(
            out,
            "Ingestion: {} runs ({} success, {} partial, {} failed, {} ticks skipped)",
            i.runs_started, i.runs_succeeded, i.runs_partial, i.runs_failed, i.ticks_skipped
        );
        let _ = writeln!(
            out,
            "Rates: {} accepted, {} rejected, {} persisted, {} events published",
            i.rates_accepted, i.rates_rejected, i.rates_persisted, i.events_published
        );
        let _ = writeln!(
            out,
            "Registry: {} sessions over {} pairs, {} frames sent, {} sessions evicted",
            r.sessions, r.pairs, r.frames_sent, r.sessions_evicted
        );
        for (pair, count) in &r.subscribers_per_pair {
            let _ = writeln!(out, "  {pair}: {count} subscribers");
        }
        let _ = writeln!(
            out,
            "Reads: {} queries, {} cache, {} repository, {} degraded, {} failed (avg {} us, p99 {} us)",
            q.queries,
            q.from_cache,
            q.from_repository,
            q.degraded,
            q.failed,
            q.avg_latency_us,
            q.p99_latency_us
        );
        let _ = writeln!(out, "History points for first pair: {}", q.history_points);
        let _ = writeln!(out, "Supported pairs: {}", q.supported_pairs.join(", "));
        for c in &self.clients {
            let _ = writeln!(
                out,
                "Client {} [{}]: {} frames, {} rate updates",
                c.session_id,
                c.pairs.join(","),
                c.frames,
                c.rate_updates
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_samples() {
        let mut samples = LatencySamples::new(3);
        for ms in [100, 200, 150, 400] {
            samples.record(Duration::from_millis(ms));
        }

        // Oldest sample dropped.
        assert_eq!(samples.average_us(), 250_000);
        assert_eq!(samples.percentile_us(50), 200_000);
        assert_eq!(samples.percentile_us(99), 400_000);
        assert_eq!(LatencySamples::default().average_us(), 0);
    }

    #[test]
    fn test_registry_totals_use_pair_codes() {
        let mut stats = RegistryStats::default();
        stats.total_sessions = 2;
        stats.total_pairs = 1;
        stats.subscribers_per_pair.insert("EURUSD".into(), 2);

        let totals = RegistryTotals::new(stats, BroadcastStatsSnapshot::default());
        assert_eq!(totals.subscribers_per_pair.get("EURUSD"), Some(&2));
    }
}
