//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: trial calls test whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call after open_duration
//! Half-Open → Closed: half_open_max_attempts successful trials
//! Half-Open → Open: any trial fails
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency, owned by whoever constructs it
//! - All transitions happen under one mutex, so they are totally ordered
//! - One trial in flight at a time; concurrent callers are rejected as if open

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::clock::{tokio_clock, SharedClock};
use crate::config::CircuitBreakerConfig;
use crate::error::CircuitError;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before a trial call is admitted.
    pub open_duration: Duration,
    /// Successful trials required to close again.
    pub half_open_max_attempts: u32,
}

impl CircuitBreakerOptions {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            open_duration: config.open_duration(),
            half_open_max_attempts: config.half_open_max_attempts,
        }
    }
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default())
    }
}

/// Read-only view of the breaker's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
    pub last_transition_at: Instant,
    pub half_open_successes: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_transition_at: Instant,
    half_open_successes: u32,
    trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Thread-safe circuit breaker guarding one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    options: CircuitBreakerOptions,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker on the tokio clock.
    ///
    /// Thresholds below 1 are raised to 1.
    pub fn new(name: impl Into<String>, options: CircuitBreakerOptions) -> Self {
        Self::with_clock(name, options, tokio_clock())
    }

    pub fn with_clock(
        name: impl Into<String>,
        options: CircuitBreakerOptions,
        clock: SharedClock,
    ) -> Self {
        let options = CircuitBreakerOptions {
            failure_threshold: options.failure_threshold.max(1),
            half_open_max_attempts: options.half_open_max_attempts.max(1),
            ..options
        };
        let now = clock.now();
        Self {
            name: name.into(),
            options,
            clock,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
                last_transition_at: now,
                half_open_successes: 0,
                trial_in_flight: false,
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(name, CircuitBreakerOptions::from_config(config))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> CircuitBreakerOptions {
        self.options
    }

    /// Current state.
    ///
    /// An expired Open state only becomes Half-Open on the next call, so
    /// `Open` here may mean a trial would already be admitted. Use
    /// [`retry_after`](Self::retry_after) to tell the two apart.
    pub fn get_state(&self) -> BreakerState {
        self.lock().state
    }

    /// Time left before an open breaker admits a trial call.
    ///
    /// `None` unless the breaker is open; `Some(Duration::ZERO)` once the
    /// next call would be admitted as a trial.
    pub fn retry_after(&self) -> Option<Duration> {
        let now = self.clock.now();
        let inner = self.lock();
        (inner.state == BreakerState::Open).then(|| {
            let elapsed = now.saturating_duration_since(inner.last_transition_at);
            self.options.open_duration.saturating_sub(elapsed)
        })
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            last_transition_at: inner.last_transition_at,
            half_open_successes: inner.half_open_successes,
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// When the circuit is open the operation is never invoked and
    /// [`CircuitError::Open`] is returned.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit()?;
        let mut permit = Permit {
            breaker: self,
            admission,
            settled: false,
        };

        let result = operation().await;
        permit.settle(result.is_ok());
        result.map_err(CircuitError::Operation)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn admit<E>(&self) -> Result<Admission, CircuitError<E>> {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => {
                let elapsed = now.saturating_duration_since(inner.last_transition_at);
                if elapsed >= self.options.open_duration {
                    self.transition(&mut inner, BreakerState::HalfOpen, now);
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                } else {
                    Err(self.reject(Some(self.options.open_duration - elapsed)))
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    tracing::debug!(breaker = %self.name, "Trial in flight, rejecting call");
                    Err(self.reject(None))
                } else {
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    fn reject<E>(&self, retry_after: Option<Duration>) -> CircuitError<E> {
        metrics::record_breaker_rejected(&self.name);
        CircuitError::Open {
            name: self.name.clone(),
            retry_after,
        }
    }

    fn on_success(&self, admission: Admission) {
        let now = self.clock.now();
        let mut inner = self.lock();

        match (admission, inner.state) {
            (Admission::Normal, BreakerState::Closed) => inner.failure_count = 0,
            (Admission::Trial, BreakerState::HalfOpen) => {
                inner.trial_in_flight = false;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.options.half_open_max_attempts {
                    self.transition(&mut inner, BreakerState::Closed, now);
                    tracing::info!(breaker = %self.name, "Circuit breaker closed after recovery");
                }
            }
            // Late result from a call admitted under an earlier state.
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission) {
        let now = self.clock.now();
        let mut inner = self.lock();

        match (admission, inner.state) {
            (Admission::Normal, BreakerState::Closed) => {
                inner.failure_count += 1;
                inner.last_failure_at = Some(now);
                if inner.failure_count >= self.options.failure_threshold {
                    let failures = inner.failure_count;
                    self.transition(&mut inner, BreakerState::Open, now);
                    tracing::warn!(
                        breaker = %self.name,
                        failures,
                        open_for = ?self.options.open_duration,
                        "Circuit breaker opened"
                    );
                }
            }
            (Admission::Trial, BreakerState::HalfOpen) => {
                inner.last_failure_at = Some(now);
                self.transition(&mut inner, BreakerState::Open, now);
                tracing::warn!(breaker = %self.name, "Trial call failed, circuit re-opened");
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    /// Apply a transition; counters reset on every state change.
    fn transition(&self, inner: &mut BreakerInner, to: BreakerState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition_at = now;
        inner.failure_count = 0;
        inner.half_open_successes = 0;
        inner.trial_in_flight = false;

        if to == BreakerState::HalfOpen {
            tracing::info!(breaker = %self.name, "Circuit breaker transitioning to half-open");
        }
        tracing::debug!(breaker = %self.name, %from, %to, "Circuit breaker transition");
        metrics::record_breaker_transition(&self.name, to);
    }
}

/// Admission held for the duration of one call.
///
/// Dropping an unsettled trial permit (the caller abandoned the future) frees
/// the trial slot without counting an outcome.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.on_success(self.admission);
        } else {
            self.breaker.on_failure(self.admission);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.release_trial();
        }
    }
}
