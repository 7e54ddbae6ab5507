//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate >= threshold over the sliding window
//!                (once minimum_number_of_calls outcomes are recorded)
//! Open → Half-Open: first admission after wait_duration_in_open
//! Half-Open → Closed: permitted_calls_in_half_open trials all succeed
//! Half-Open → Open: any trial fails
//! ```
//!
//! # Design Decisions
//! - Per-dependency circuit breaker (not global), each behind its own lock
//! - Admission and half-open slot reservation happen in one critical section
//! - Fail fast in Open state; extra half-open calls are rejected like Open
//! - Every transition bumps a generation; outcomes from permits issued in an
//!   earlier generation are ignored

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{CircuitBreakerConfig, ConfigHandle};
use crate::observability::metrics;

/// Circuit state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(label)
    }
}

/// Ring buffer of the most recent call outcomes.
#[derive(Debug)]
struct OutcomeWindow {
    outcomes: VecDeque<bool>,
    capacity: usize,
    failures: usize,
}

impl OutcomeWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
            failures: 0,
        }
    }

    fn push(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            if let Some(false) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
        self.outcomes.push_back(success);
        if !success {
            self.failures += 1;
        }
    }

    fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Failure percentage over the recorded outcomes.
    fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.failures as f64 * 100.0 / self.outcomes.len() as f64
    }

    fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }

    /// Adopt a new capacity after a config change. Recorded outcomes are dropped.
    fn ensure_capacity(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity != self.capacity {
            *self = Self::new(capacity);
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window: OutcomeWindow,
    opened_at: Option<Instant>,
    half_open_admitted: u32,
    half_open_successes: u32,
    generation: u64,
}

impl BreakerState {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            window: OutcomeWindow::new(config.sliding_window_size),
            opened_at: None,
            half_open_admitted: 0,
            half_open_successes: 0,
            generation: 0,
        }
    }

    fn transition(&mut self, key: &str, to: CircuitState, now: Instant) {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.half_open_admitted = 0;
        self.half_open_successes = 0;

        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                tracing::warn!(
                    dependency = %key,
                    from = %from,
                    failure_rate = self.window.failure_rate(),
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(dependency = %key, "Circuit half-open, admitting trial calls");
            }
            CircuitState::Closed => {
                self.window.clear();
                self.opened_at = None;
                tracing::info!(dependency = %key, "Circuit closed");
            }
        }
        metrics::record_circuit_state(key, to);
    }
}

/// Point-in-time view of one dependency's breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub window_len: usize,
    pub failures: usize,
    pub successes: usize,
    pub failure_rate: f64,
    pub half_open_admitted: u32,
    pub half_open_successes: u32,
}

/// Circuit breakers for every dependency, created lazily on first use.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: Arc<ConfigHandle>,
    breakers: DashMap<String, Arc<Mutex<BreakerState>>>,
}

impl CircuitBreaker {
    pub fn new(config: Arc<ConfigHandle>) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    fn breaker(&self, key: &str, config: &CircuitBreakerConfig) -> Arc<Mutex<BreakerState>> {
        if let Some(breaker) = self.breakers.get(key) {
            return breaker.clone();
        }
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerState::new(config))))
            .clone()
    }

    /// Admit a call, reserving a trial slot when half-open.
    /// Returns the generation the permit belongs to, or the rejecting state.
    fn admit(&self, key: &str) -> Result<u64, CircuitState> {
        let config = self.config.policy_for(key).circuit_breaker;
        let breaker = self.breaker(key, &config);
        let mut st = breaker.lock();
        st.window.ensure_capacity(config.sliding_window_size);
        let now = Instant::now();

        if st.state == CircuitState::Open {
            let waited = st
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            if waited < config.wait_duration_in_open() {
                return Err(CircuitState::Open);
            }
            st.transition(key, CircuitState::HalfOpen, now);
        }

        if st.state == CircuitState::HalfOpen {
            if st.half_open_admitted >= config.permitted_calls_in_half_open {
                return Err(CircuitState::HalfOpen);
            }
            st.half_open_admitted += 1;
        }

        Ok(st.generation)
    }

    fn record(&self, key: &str, generation: Option<u64>, success: bool) {
        let config = self.config.policy_for(key).circuit_breaker;
        let breaker = self.breaker(key, &config);
        let mut st = breaker.lock();
        st.window.ensure_capacity(config.sliding_window_size);

        if let Some(generation) = generation {
            if generation != st.generation {
                tracing::debug!(dependency = %key, success, "Ignoring outcome from a previous circuit state");
                return;
            }
        }

        let now = Instant::now();
        match st.state {
            CircuitState::Closed => {
                st.window.push(success);
                // A minimum above the window size could never be reached.
                let minimum_calls = config
                    .minimum_number_of_calls
                    .min(config.sliding_window_size.max(1));
                if st.window.len() >= minimum_calls
                    && st.window.failure_rate() >= config.failure_rate_threshold
                {
                    st.transition(key, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    st.half_open_successes += 1;
                    if st.half_open_successes >= config.permitted_calls_in_half_open {
                        st.transition(key, CircuitState::Closed, now);
                    }
                } else {
                    st.transition(key, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Whether a call to `key` may be attempted now. A `true` answer reserves a
    /// half-open trial slot and must be matched by exactly one `record_outcome`.
    pub fn allow(&self, key: &str) -> bool {
        let allowed = self.admit(key).is_ok();
        if !allowed {
            metrics::record_circuit_rejected(key);
        }
        allowed
    }

    /// Record the outcome of a call previously admitted by `allow`.
    pub fn record_outcome(&self, key: &str, success: bool) {
        self.record(key, None, success);
    }

    /// Admit a call and return a guard that records its outcome.
    ///
    /// A guard dropped without `record` (error path, panic, cancelled future)
    /// records a failure.
    pub fn acquire<'a>(&'a self, key: &'a str) -> Result<CallPermit<'a>, CircuitState> {
        match self.admit(key) {
            Ok(generation) => Ok(CallPermit {
                breaker: self,
                key,
                generation,
                armed: true,
            }),
            Err(state) => {
                tracing::debug!(dependency = %key, state = %state, "Call rejected by circuit breaker");
                metrics::record_circuit_rejected(key);
                Err(state)
            }
        }
    }

    /// Current state without triggering any transition.
    pub fn state(&self, key: &str) -> CircuitState {
        self.breakers
            .get(key)
            .map(|b| b.lock().state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, key: &str) -> CircuitSnapshot {
        match self.breakers.get(key) {
            Some(breaker) => {
                let st = breaker.lock();
                CircuitSnapshot {
                    state: st.state,
                    window_len: st.window.len(),
                    failures: st.window.failures,
                    successes: st.window.len() - st.window.failures,
                    failure_rate: st.window.failure_rate(),
                    half_open_admitted: st.half_open_admitted,
                    half_open_successes: st.half_open_successes,
                }
            }
            None => CircuitSnapshot {
                state: CircuitState::Closed,
                window_len: 0,
                failures: 0,
                successes: 0,
                failure_rate: 0.0,
                half_open_admitted: 0,
                half_open_successes: 0,
            },
        }
    }

    /// Forget all state for `key`; the next call starts Closed.
    pub fn reset(&self, key: &str) {
        if self.breakers.remove(key).is_some() {
            tracing::info!(dependency = %key, "Circuit breaker reset");
            metrics::record_circuit_state(key, CircuitState::Closed);
        }
    }
}

/// Outcome guard for one admitted attempt.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    key: &'a str,
    generation: u64,
    armed: bool,
}

impl CallPermit<'_> {
    pub fn record(mut self, success: bool) {
        self.armed = false;
        self.breaker.record(self.key, Some(self.generation), success);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(dependency = %self.key, "Attempt ended without an outcome, recording failure");
            self.breaker.record(self.key, Some(self.generation), false);
        }
    }
}
