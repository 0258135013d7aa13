//! Rates derived from a EUR-based reference table.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use fxstream_common::{CurrencyPair, Rate, Result};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use crate::provider::RateProvider;

const NAME: &str = "Cross Rate (EUR reference)";
const CONFIDENCE: f64 = 0.85;
const TTL_SECONDS: u32 = 5;
const REFERENCE: &str = "EUR";

/// Computes any pair from `EUR -> X` reference rates.
///
/// Reports itself unavailable until a reference table has been loaded.
pub struct CrossRateProvider {
    reference: RwLock<HashMap<String, Decimal>>,
}

impl CrossRateProvider {
    pub fn new() -> Self {
        Self {
            reference: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the reference table (`currency -> units per 1 EUR`).
    pub fn set_reference_rates(&self, rates: HashMap<String, Decimal>) {
        let rates = rates
            .into_iter()
            .filter(|(_, rate)| *rate > Decimal::ZERO)
            .map(|(code, rate)| (code.to_uppercase(), rate))
            .collect();
        *self.reference.write() = rates;
    }

    /// Mid rate for a pair, if it can be derived.
    pub fn mid_rate(&self, pair: &CurrencyPair) -> Option<Decimal> {
        let table = self.reference.read();
        let (from, to) = (pair.from_currency(), pair.to_currency());

        let mid = if from == REFERENCE {
            *table.get(to)?
        } else if to == REFERENCE {
            Decimal::ONE.checked_div(*table.get(from)?)?
        } else {
            table.get(to)?.checked_div(*table.get(from)?)?
        };
        Some(mid.round_dp(6))
    }
}

impl Default for CrossRateProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateProvider for CrossRateProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn is_available(&self) -> bool {
        !self.reference.read().is_empty()
    }

    fn confidence_score(&self) -> f64 {
        CONFIDENCE
    }

    async fn fetch_rates(&self, pairs: &[CurrencyPair]) -> Result<Vec<Rate>> {
        let timestamp = Utc::now();
        let bid_factor = Decimal::new(9995, 4);
        let ask_factor = Decimal::new(10005, 4);

        let rates: Vec<Rate> = pairs
            .iter()
            .filter_map(|pair| {
                let mid = self.mid_rate(pair)?;
                Some(
                    Rate::new(pair.clone(), mid, NAME)
                        .with_quote(mid * bid_factor, mid * ask_factor)
                        .with_timestamp(timestamp)
                        .with_confidence(CONFIDENCE)
                        .with_ttl(TTL_SECONDS),
                )
            })
            .collect();

        debug!(derived = rates.len(), requested = pairs.len(), "Derived cross rates");
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn setup_provider() -> CrossRateProvider {
        let provider = CrossRateProvider::new();
        provider.set_reference_rates(HashMap::from([
            ("USD".to_string(), dec!(1.08)),
            ("GBP".to_string(), dec!(0.86)),
            ("JPY".to_string(), dec!(162.00)),
        ]));
        provider
    }

    #[test]
    fn test_unavailable_until_loaded() {
        let provider = CrossRateProvider::new();
        assert!(!provider.is_available());
        assert!(setup_provider().is_available());
    }

    #[test]
    fn test_direct_inverse_and_cross() {
        let provider = setup_provider();
        assert_eq!(provider.mid_rate(&"EURUSD".into()), Some(dec!(1.08)));
        assert_eq!(provider.mid_rate(&"USDEUR".into()), Some(dec!(0.925926)));
        assert_eq!(provider.mid_rate(&"USDJPY".into()), Some(dec!(150)));
        assert_eq!(provider.mid_rate(&"CHFUSD".into()), None);
    }

    #[tokio::test]
    async fn test_fetch_omits_unknown_pairs() {
        let provider = setup_provider();
        let rates = provider
            .fetch_rates(&["EURUSD".into(), "CHFUSD".into(), "GBPUSD".into()])
            .await
            .unwrap();

        assert_eq!(rates.len(), 2);
        let eurusd = &rates[0];
        assert_eq!(eurusd.bid, Some(dec!(1.07946)));
        assert_eq!(eurusd.ask, Some(dec!(1.08054)));
        assert_eq!(eurusd.confidence_score, Some(0.85));
    }
}
