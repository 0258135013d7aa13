//! Circuit breaker guarding one downstream dependency.
//!
//! - **Closed**: calls go through; consecutive retryable failures are counted.
//! - **Open**: calls are rejected without running until the cool-down elapses.
//! - **HalfOpen**: a single trial call decides between Closed and Open.
//!
//! Only errors for which [`FxStreamError::is_retryable`] holds count as
//! failures. A `RateNotFound` answer means the dependency is healthy.
//!
//! Every admitted call carries the circuit generation it was admitted under.
//! The generation moves on each transition, so a result that arrives after
//! the circuit has moved on is dropped instead of undoing the transition.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use fxstream_common::FxStreamError;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::CircuitError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed.
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
    generation: u64,
}

impl Circuit {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_started: None,
            generation: 0,
        }
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Admission ticket for one call.
#[derive(Debug, Clone, Copy)]
struct Permit {
    generation: u64,
}

/// Thread-safe breaker shared by all callers of one dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    circuit: Mutex<Circuit>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            circuit: Mutex::new(Circuit::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying the Open to HalfOpen transition if due.
    pub fn state(&self) -> CircuitState {
        let mut circuit = self.circuit.lock();
        self.refresh(&mut circuit);
        circuit.state
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        let mut circuit = self.circuit.lock();
        circuit.transition(CircuitState::Closed);
        circuit.consecutive_failures = 0;
        circuit.opened_at = None;
        circuit.trial_started = None;
        info!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Run `f` through the breaker.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, CircuitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = fxstream_common::Result<T>>,
    {
        let permit = self.acquire()?;

        match f().await {
            Ok(value) => {
                self.record_success(permit);
                Ok(value)
            }
            Err(e) if e.is_retryable() => {
                self.record_failure(permit, &e);
                Err(CircuitError::Failed(e))
            }
            Err(e) => {
                self.record_success(permit);
                Err(CircuitError::Failed(e))
            }
        }
    }

    fn refresh(&self, circuit: &mut Circuit) {
        if circuit.state != CircuitState::Open {
            return;
        }
        let cooled = circuit
            .opened_at
            .map_or(true, |at| at.elapsed() >= self.config.cool_down);
        if cooled {
            info!(breaker = %self.name, "Circuit breaker half-open");
            circuit.transition(CircuitState::HalfOpen);
            circuit.trial_started = None;
        }
    }

    fn acquire(&self) -> Result<Permit, CircuitError> {
        let mut circuit = self.circuit.lock();
        self.refresh(&mut circuit);

        match circuit.state {
            CircuitState::Closed => Ok(Permit {
                generation: circuit.generation,
            }),
            CircuitState::Open => Err(CircuitError::Open(self.name.clone())),
            CircuitState::HalfOpen => {
                // A trial abandoned mid-flight frees the slot after one cool-down.
                let busy = circuit
                    .trial_started
                    .is_some_and(|at| at.elapsed() < self.config.cool_down);
                if busy {
                    return Err(CircuitError::Open(self.name.clone()));
                }
                // A new trial supersedes any abandoned one.
                circuit.generation = circuit.generation.wrapping_add(1);
                circuit.trial_started = Some(Instant::now());
                debug!(breaker = %self.name, "Circuit breaker trial call");
                Ok(Permit {
                    generation: circuit.generation,
                })
            }
        }
    }

    fn record_success(&self, permit: Permit) {
        let mut circuit = self.circuit.lock();
        if permit.generation != circuit.generation {
            debug!(breaker = %self.name, "Ignoring stale success");
            return;
        }

        match circuit.state {
            CircuitState::Closed => circuit.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "Circuit breaker closed");
                circuit.transition(CircuitState::Closed);
                circuit.consecutive_failures = 0;
                circuit.opened_at = None;
                circuit.trial_started = None;
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, permit: Permit, error: &FxStreamError) {
        let mut circuit = self.circuit.lock();
        if permit.generation != circuit.generation {
            debug!(breaker = %self.name, error = %error, "Ignoring stale failure");
            return;
        }
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);

        let should_open = match circuit.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => circuit.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            warn!(
                breaker = %self.name,
                failures = circuit.consecutive_failures,
                error = %error,
                "Circuit breaker opened"
            );
            circuit.transition(CircuitState::Open);
            circuit.opened_at = Some(Instant::now());
            circuit.trial_started = None;
        } else {
            debug!(
                breaker = %self.name,
                failures = circuit.consecutive_failures,
                "Circuit breaker recorded failure"
            );
        }
    }
}
