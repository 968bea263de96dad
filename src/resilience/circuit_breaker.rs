//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: window holds >= minimum calls and failure rate >= threshold
//! Open → Half-Open: first request after the wait duration (admitted as a trial)
//! Half-Open → Closed: every permitted trial call succeeded
//! Half-Open → Open: any trial call fails (wait timer restarts)
//! ```
//!
//! # Design Decisions
//! - Per-route circuit breaker (not global)
//! - One mutex per breaker guards state and window together
//! - Outcomes carry the generation they were admitted under; outcomes from an
//!   earlier state are dropped
//! - An admitted call that never reports (client went away) hands its
//!   half-open slot back instead of leaking it

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::routing::Router;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 closed, 1 open, 2 half-open.
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Permitted,
    Rejected,
}

/// The breaker's lock was poisoned; no decision can be made.
#[derive(Debug, Error)]
#[error("circuit breaker for route {0} is unavailable")]
pub struct BreakerUnavailable(pub String);

/// Fixed-capacity ring of the most recent outcomes.
#[derive(Debug)]
struct SlidingWindow {
    outcomes: Vec<bool>,
    write_index: u64,
    len: usize,
}

impl SlidingWindow {
    fn new(size: usize) -> Self {
        Self {
            outcomes: vec![true; size.max(1)],
            write_index: 0,
            len: 0,
        }
    }

    fn push(&mut self, success: bool) {
        let capacity = self.outcomes.len();
        let slot = (self.write_index % capacity as u64) as usize;
        self.outcomes[slot] = success;
        self.write_index += 1;
        self.len = (self.len + 1).min(capacity);
    }

    fn len(&self) -> usize {
        self.len
    }

    /// Failure percentage over the recorded entries.
    fn failure_rate(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        let failures = self.outcomes[..self.len].iter().filter(|ok| !**ok).count();
        failures as f32 * 100.0 / self.len as f32
    }

    fn clear(&mut self) {
        self.write_index = 0;
        self.len = 0;
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window: SlidingWindow,
    opened_at_millis: u64,
    half_open_permits: usize,
    half_open_successes: usize,
    generation: u64,
}

/// Circuit breaker guarding one route.
#[derive(Debug)]
pub struct CircuitBreaker {
    route_id: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(route_id: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let window = SlidingWindow::new(config.sliding_window_size);
        let route_id = route_id.into();
        metrics::record_circuit_state(&route_id, CircuitState::Closed);
        Self {
            route_id,
            config,
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                window,
                opened_at_millis: 0,
                half_open_permits: 0,
                half_open_successes: 0,
                generation: 0,
            }),
        }
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn state(&self) -> Result<CircuitState, BreakerUnavailable> {
        Ok(self.lock()?.state)
    }

    /// Decide whether a call may reach the backend.
    ///
    /// Shares admission logic with [`CircuitBreaker::acquire`], which is what
    /// the pipeline uses so the outcome travels with the call.
    pub fn allow_request(&self) -> Result<Admission, BreakerUnavailable> {
        let mut inner = self.lock()?;
        Ok(self.admit(&mut inner).map_or(Admission::Rejected, |_| Admission::Permitted))
    }

    /// Feed one call outcome into the state machine.
    ///
    /// Same transitions as [`CallPermit::record`]; the permit additionally
    /// ignores outcomes from before a state change.
    pub fn record_outcome(&self, success: bool, latency: Duration) -> Result<(), BreakerUnavailable> {
        let mut inner = self.lock()?;
        self.apply_outcome(&mut inner, success, latency);
        Ok(())
    }

    /// Admission that reports back through the returned permit.
    ///
    /// `Ok(None)` means the call was rejected.
    pub fn acquire(self: &Arc<Self>) -> Result<Option<CallPermit>, BreakerUnavailable> {
        let mut inner = self.lock()?;
        Ok(self.admit(&mut inner).map(|generation| CallPermit {
            breaker: Arc::clone(self),
            generation,
            settled: false,
        }))
    }

    fn lock(&self) -> Result<MutexGuard<'_, BreakerState>, BreakerUnavailable> {
        self.inner
            .lock()
            .map_err(|_| BreakerUnavailable(self.route_id.clone()))
    }

    /// Returns the generation the call was admitted under.
    fn admit(&self, inner: &mut BreakerState) -> Option<u64> {
        match inner.state {
            CircuitState::Closed => Some(inner.generation),
            CircuitState::Open => {
                let waited = self.clock.now_millis().saturating_sub(inner.opened_at_millis);
                if waited < self.config.wait_duration_in_open_state_ms {
                    metrics::record_circuit_rejection(&self.route_id);
                    return None;
                }
                self.transition(inner, CircuitState::HalfOpen);
                inner.half_open_permits = inner.half_open_permits.saturating_sub(1);
                Some(inner.generation)
            }
            CircuitState::HalfOpen => {
                if inner.half_open_permits == 0 {
                    metrics::record_circuit_rejection(&self.route_id);
                    return None;
                }
                inner.half_open_permits -= 1;
                Some(inner.generation)
            }
        }
    }

    fn apply_outcome(&self, inner: &mut BreakerState, success: bool, latency: Duration) {
        tracing::trace!(
            route = %self.route_id,
            success,
            latency_ms = latency.as_millis() as u64,
            state = ?inner.state,
            "Recording call outcome"
        );

        match inner.state {
            CircuitState::Closed => {
                inner.window.push(success);
                let rate = inner.window.failure_rate();
                if inner.window.len() >= self.config.minimum_number_of_calls
                    && rate >= self.config.failure_rate_threshold
                {
                    tracing::warn!(
                        route = %self.route_id,
                        failure_rate = rate,
                        calls = inner.window.len(),
                        "Failure rate above threshold, opening circuit"
                    );
                    self.transition(inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                if !success {
                    tracing::warn!(route = %self.route_id, "Trial call failed, reopening circuit");
                    self.transition(inner, CircuitState::Open);
                    return;
                }
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.permitted_number_of_calls_in_half_open_state {
                    self.transition(inner, CircuitState::Closed);
                }
            }
            // Late outcome from a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.window.clear();
        match to {
            CircuitState::Open => {
                inner.opened_at_millis = self.clock.now_millis();
            }
            CircuitState::HalfOpen => {
                inner.half_open_permits = self.config.permitted_number_of_calls_in_half_open_state;
                inner.half_open_successes = 0;
            }
            CircuitState::Closed => {}
        }
        tracing::info!(route = %self.route_id, from = ?from, to = ?to, "Circuit state changed");
        metrics::record_circuit_state(&self.route_id, to);
    }

    fn settle(&self, generation: u64, outcome: Option<(bool, Duration)>) -> Result<(), BreakerUnavailable> {
        let mut inner = self.lock()?;
        if inner.generation != generation {
            return Ok(());
        }
        match outcome {
            Some((success, latency)) => self.apply_outcome(&mut inner, success, latency),
            None => {
                if inner.state == CircuitState::HalfOpen {
                    inner.half_open_permits += 1;
                }
            }
        }
        Ok(())
    }
}

/// Proof of admission. Report the outcome with [`CallPermit::record`];
/// dropping it unreported releases any half-open slot it held.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    settled: bool,
}

impl CallPermit {
    pub fn record(mut self, success: bool, latency: Duration) -> Result<(), BreakerUnavailable> {
        self.settled = true;
        self.breaker.settle(self.generation, Some((success, latency)))
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.breaker.settle(self.generation, None);
        }
    }
}

/// Breakers for every route that attaches one, created at startup.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn from_routes(router: &Router, config: &CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        if !config.enabled {
            return Self::default();
        }
        let breakers = router
            .routes()
            .iter()
            .filter(|route| route.circuit_breaker)
            .map(|route| {
                let breaker = CircuitBreaker::new(route.id.clone(), config.clone(), clock.clone());
                (route.id.clone(), Arc::new(breaker))
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, route_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(route_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
