//! Rate validation and enrichment.
//!
//! Malformed rates are dropped. Rates that moved too far from the last
//! accepted rate for their pair are kept with a lowered confidence score.

use dashmap::DashMap;
use fxstream_common::{CurrencyPair, FxStreamError, Rate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};

/// Validation settings.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// When false, rates pass through untouched.
    pub enabled: bool,
    /// Deviation from the previous accepted rate, in percent, above which a
    /// rate is flagged.
    pub max_deviation_percent: f64,
    /// Confidence given to rates that arrive without one.
    pub default_confidence: f64,
    /// TTL given to rates that arrive without one.
    pub default_ttl_seconds: u32,
    /// Confidence forced onto flagged rates.
    pub deviation_confidence: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_deviation_percent: 5.0,
            default_confidence: 0.95,
            default_ttl_seconds: 5,
            deviation_confidence: 0.7,
        }
    }
}

impl ValidationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_deviation_percent > 0.0) {
            return Err("max_deviation_percent must be positive".to_string());
        }
        for (name, score) in [
            ("default_confidence", self.default_confidence),
            ("deviation_confidence", self.deviation_confidence),
        ] {
            if !(0.0..=1.0).contains(&score) {
                return Err(format!("{} must be within [0, 1]", name));
            }
        }
        Ok(())
    }
}

/// An accepted rate with the comparison against its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRate {
    pub rate: Rate,
    pub previous: Option<Rate>,
    /// Signed `(new - previous) / previous * 100`.
    pub change_percent: Option<Decimal>,
}

/// Result of validating one batch.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    /// Accepted rates in input order.
    pub accepted: Vec<ValidatedRate>,
    /// One `ValidationRejected` per dropped rate.
    pub rejected: Vec<FxStreamError>,
}

impl ValidationOutcome {
    /// The accepted rates without their comparison data.
    pub fn rates(&self) -> Vec<Rate> {
        self.accepted.iter().map(|v| v.rate.clone()).collect()
    }
}

/// Validates batches against the last accepted rate per pair.
pub struct RateValidator {
    config: ValidationConfig,
    last_accepted: DashMap<CurrencyPair, Rate>,
}

impl RateValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            last_accepted: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Last accepted rate for a pair.
    pub fn last_accepted(&self, pair: &CurrencyPair) -> Option<Rate> {
        self.last_accepted.get(pair).map(|r| r.clone())
    }

    /// Validate and enrich a batch.
    pub fn validate(&self, rates: Vec<Rate>) -> ValidationOutcome {
        if !self.config.enabled {
            debug!(count = rates.len(), "Validation disabled");
            return ValidationOutcome {
                accepted: rates
                    .into_iter()
                    .map(|mut rate| {
                        rate.ensure_id();
                        ValidatedRate {
                            rate,
                            previous: None,
                            change_percent: None,
                        }
                    })
                    .collect(),
                rejected: Vec::new(),
            };
        }

        let total = rates.len();
        let mut outcome = ValidationOutcome::default();

        for rate in rates {
            match self.validate_one(rate) {
                Ok(validated) => outcome.accepted.push(validated),
                Err(e) => {
                    warn!(error = %e, "Rate rejected");
                    outcome.rejected.push(e);
                }
            }
        }

        info!(
            total,
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            "Validated rates"
        );
        outcome
    }

    fn validate_one(&self, mut rate: Rate) -> Result<ValidatedRate, FxStreamError> {
        check_well_formed(&rate)?;

        let previous = self.last_accepted(&rate.pair);
        let mut change_percent = None;

        if let Some(prev) = previous.as_ref().filter(|p| p.rate > Decimal::ZERO) {
            let deviation = deviation_percent(prev.rate, rate.rate);
            if deviation.to_f64().unwrap_or(f64::MAX) > self.config.max_deviation_percent {
                warn!(
                    pair = %rate.pair,
                    previous = %prev.rate,
                    current = %rate.rate,
                    deviation = %deviation,
                    "Rate deviation exceeds threshold"
                );
                rate.confidence_score = Some(self.config.deviation_confidence);
            }
            change_percent = Some(((rate.rate - prev.rate) / prev.rate * Decimal::ONE_HUNDRED).round_dp(4));
        }

        if rate.confidence_score.is_none() {
            rate.confidence_score = Some(self.config.default_confidence);
        }
        if rate.ttl_seconds.is_none() {
            rate.ttl_seconds = Some(self.config.default_ttl_seconds);
        }
        rate.ensure_id();

        self.last_accepted.insert(rate.pair.clone(), rate.clone());

        Ok(ValidatedRate {
            rate,
            previous,
            change_percent,
        })
    }
}

fn check_well_formed(rate: &Rate) -> Result<(), FxStreamError> {
    let reject = |reason: &str| FxStreamError::ValidationRejected {
        pair: rate.pair.to_string(),
        reason: reason.to_string(),
    };

    if !rate.pair.is_valid() {
        return Err(reject("malformed currency pair"));
    }
    if rate.rate <= Decimal::ZERO {
        return Err(reject("rate must be positive"));
    }
    if rate.timestamp.is_none() {
        return Err(reject("missing timestamp"));
    }
    if rate.is_crossed() {
        return Err(reject("bid above ask"));
    }
    Ok(())
}

/// `round_half_up(|current - previous| / previous, 4) * 100`.
fn deviation_percent(previous: Decimal, current: Decimal) -> Decimal {
    ((current - previous).abs() / previous)
        .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
        * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn make_test_rate(pair: &str, value: Decimal) -> Rate {
        Rate::new(pair.into(), value, "TEST")
    }

    fn setup_validator() -> RateValidator {
        RateValidator::new(ValidationConfig::default())
    }

    #[test]
    fn test_large_move_lowers_confidence() {
        let validator = setup_validator();
        validator.validate(vec![make_test_rate("EURUSD", dec!(1.1000))]);

        let outcome = validator.validate(vec![make_test_rate("EURUSD", dec!(1.2000))]);
        let accepted = &outcome.accepted[0];

        assert_eq!(accepted.rate.confidence_score, Some(0.7));
        assert_eq!(accepted.previous.as_ref().map(|p| p.rate), Some(dec!(1.1000)));
        assert_eq!(accepted.change_percent, Some(dec!(9.0909)));
    }

    #[test]
    fn test_small_move_keeps_confidence() {
        let validator = setup_validator();
        validator.validate(vec![make_test_rate("EURUSD", dec!(1.1000))]);

        let outcome = validator.validate(vec![
            make_test_rate("EURUSD", dec!(1.1010)).with_confidence(0.99)
        ]);

        assert_eq!(outcome.accepted[0].rate.confidence_score, Some(0.99));
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let validator = setup_validator();
        let outcome = validator.validate(vec![
            make_test_rate("EURUSD", dec!(1.0850)),
            make_test_rate("GBPUSD", dec!(1.2650)).with_confidence(0.5).with_ttl(30),
        ]);

        let rates = outcome.rates();
        assert_eq!(rates[0].confidence_score, Some(0.95));
        assert_eq!(rates[0].ttl_seconds, Some(5));
        assert_eq!(rates[1].confidence_score, Some(0.5));
        assert_eq!(rates[1].ttl_seconds, Some(30));
        assert!(outcome.accepted[0].previous.is_none());
    }

    #[test]
    fn test_accepted_rate_carries_record_id() {
        let validator = setup_validator();
        let rate = make_test_rate("EURUSD", dec!(1.0850));
        let millis = rate.timestamp.map(|ts| ts.timestamp_millis()).unwrap();

        let outcome = validator.validate(vec![rate]);

        let expected = format!("EURUSD_TEST_{millis}");
        assert_eq!(outcome.accepted[0].rate.id.as_deref(), Some(expected.as_str()));
        assert_eq!(
            validator.last_accepted(&"EURUSD".into()).and_then(|r| r.id),
            Some(expected)
        );
    }

    #[test]
    fn test_malformed_rates_rejected_in_order() {
        let validator = setup_validator();
        let mut no_timestamp = make_test_rate("USDJPY", dec!(156.42));
        no_timestamp.timestamp = None;

        let outcome = validator.validate(vec![
            make_test_rate("EURUSD", dec!(1.0850)),
            make_test_rate("EURUSD", dec!(0)),
            make_test_rate("EURUS", dec!(1.0)),
            no_timestamp,
            make_test_rate("GBPUSD", dec!(1.2650)).with_quote(dec!(1.2660), dec!(1.2640)),
            make_test_rate("AUDUSD", dec!(0.6550)),
        ]);

        let pairs: Vec<_> = outcome.accepted.iter().map(|v| v.rate.pair.code()).collect();
        assert_eq!(pairs, vec!["EURUSD", "AUDUSD"]);
        assert_eq!(outcome.rejected.len(), 4);
        assert!(outcome
            .rejected
            .iter()
            .all(|e| e.error_code() == "VALIDATION_REJECTED"));
        assert!(validator.last_accepted(&"GBPUSD".into()).is_none());
    }

    #[test]
    fn test_disabled_passes_through() {
        let validator = RateValidator::new(ValidationConfig {
            enabled: false,
            ..Default::default()
        });
        let outcome = validator.validate(vec![make_test_rate("EURUSD", dec!(-1))]);

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].rate.confidence_score, None);
        assert!(validator.last_accepted(&"EURUSD".into()).is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(ValidationConfig::default().validate().is_ok());
        let bad = ValidationConfig {
            deviation_confidence: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    proptest! {
        /// Confidence drops to 0.7 exactly when the move exceeds 5%.
        #[test]
        fn deviation_flag_matches_threshold(
            previous_units in 5_000i64..2_000_000,
            move_bp in -2_000i64..2_000,
        ) {
            let previous = Decimal::new(previous_units, 4);
            let current = previous + previous * Decimal::new(move_bp, 4);

            let validator = setup_validator();
            validator.validate(vec![make_test_rate("EURUSD", previous)]);
            let outcome = validator.validate(vec![
                make_test_rate("EURUSD", current).with_confidence(0.99)
            ]);

            let expected = if move_bp.abs() > 500 { 0.7 } else { 0.99 };
            prop_assert_eq!(outcome.accepted[0].rate.confidence_score, Some(expected));
        }
    }
}
