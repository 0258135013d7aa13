//! Offline market simulation.
//!
//! Each fetch moves every requested pair by a random step of at most
//! ±0.1% from the last generated value and quotes bid/ask around it using
//! the pair's typical spread.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fxstream_common::{CurrencyPair, Rate, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::provider::RateProvider;

const NAME: &str = "Simulated Market";
const CONFIDENCE: f64 = 0.99;
const TTL_SECONDS: u32 = 5;
const VOLATILITY: f64 = 0.001;
const SCALE: u32 = 5;
const DEFAULT_SPREAD_BPS: u32 = 3;

/// Starting rate for a known pair.
fn base_rate(pair: &str) -> Option<Decimal> {
    let rate = match pair {
        "EURUSD" => Decimal::new(10850, 4),
        "GBPUSD" => Decimal::new(12650, 4),
        "USDJPY" => Decimal::new(15642, 2),
        "AUDUSD" => Decimal::new(6234, 4),
        "USDCAD" => Decimal::new(13523, 4),
        "EURGBP" => Decimal::new(8575, 4),
        "EURJPY" => Decimal::new(16971, 2),
        "GBPJPY" => Decimal::new(19787, 2),
        _ => return None,
    };
    Some(rate)
}

/// Typical half-spread in basis points.
fn spread_bps(pair: &str) -> u32 {
    match pair {
        "EURUSD" | "USDJPY" | "EURGBP" => 2,
        "GBPUSD" | "AUDUSD" | "USDCAD" | "EURJPY" => 3,
        "GBPJPY" => 4,
        _ => DEFAULT_SPREAD_BPS,
    }
}

struct MarketState {
    rng: StdRng,
    last: HashMap<CurrencyPair, Decimal>,
}

/// Always-available provider generating a random walk around realistic
/// base rates.
pub struct SimulatedMarketProvider {
    state: Mutex<MarketState>,
    latency: Option<(Duration, Duration)>,
}

impl SimulatedMarketProvider {
    /// Create a provider seeded from entropy.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a provider with a fixed seed for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(MarketState {
                rng,
                last: HashMap::new(),
            }),
            latency: None,
        }
    }

    /// Sleep a random duration in `[min, max]` before each fetch.
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.latency = Some((min, max.max(min)));
        self
    }

    fn next_latency(&self) -> Option<Duration> {
        let (min, max) = self.latency?;
        if min == max {
            return Some(min);
        }
        let mut state = self.state.lock();
        Some(state.rng.gen_range(min..=max))
    }

    fn generate(state: &mut MarketState, pair: &CurrencyPair) -> Rate {
        let start = base_rate(pair.code()).unwrap_or(Decimal::ONE);
        let last = state.last.get(pair).copied().unwrap_or(start);

        let change: f64 = state.rng.gen_range(-VOLATILITY..=VOLATILITY);
        let factor = Decimal::from_f64(1.0 + change).unwrap_or(Decimal::ONE);
        let rate = (last * factor).round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
        state.last.insert(pair.clone(), rate);

        let spread = half_spread(rate, pair);
        let bid = (rate - spread).round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
        let ask = (rate + spread).round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);

        Rate::new(pair.clone(), rate, NAME)
            .with_quote(bid, ask)
            .with_timestamp(Utc::now())
            .with_confidence(CONFIDENCE)
            .with_ttl(TTL_SECONDS)
    }
}

/// Half-spread for a pair. JPY pairs quote two decimals, so their spread is
/// scaled by 100.
fn half_spread(rate: Decimal, pair: &CurrencyPair) -> Decimal {
    let bps = Decimal::from(spread_bps(pair.code()));
    let divisor = if pair.involves("JPY") {
        Decimal::ONE_HUNDRED
    } else {
        Decimal::from(10_000)
    };
    (rate * bps / divisor).round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero)
}

impl Default for SimulatedMarketProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateProvider for SimulatedMarketProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        true
    }

    fn confidence_score(&self) -> f64 {
        CONFIDENCE
    }

    async fn fetch_rates(&self, pairs: &[CurrencyPair]) -> Result<Vec<Rate>> {
        if let Some(latency) = self.next_latency() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        let rates: Vec<Rate> = pairs
            .iter()
            .map(|pair| Self::generate(&mut state, pair))
            .collect();

        debug!(generated = rates.len(), "Generated simulated rates");
        Ok(rates)
    }
}
