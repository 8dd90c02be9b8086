//! Retry logic.
//!
//! # Responsibilities
//! - Classify failures through the caller's `is_retryable` predicate
//! - Execute retries with exponential backoff + full jitter
//! - Enforce an optional retry budget shared between calls
//!
//! # Design Decisions
//! - Attempt 1 runs immediately; waits happen only between attempts
//! - Waits are clock sleeps raced against a cancellation token
//! - `on_retry` is an observer: a panic inside it is caught and logged

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::{tokio_clock, SharedClock};
use crate::config::RetryConfig;
use crate::error::RetryError;
use crate::observability::metrics;
use crate::resilience::backoff::{backoff_bound, full_jitter};

type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryObserver<E> = Arc<dyn Fn(u32, &E) + Send + Sync>;

/// Per-call retry settings.
pub struct RetryOptions<E> {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    is_retryable: Classifier<E>,
    on_retry: Option<RetryObserver<E>>,
}

impl<E> RetryOptions<E> {
    /// Defaults: 3 attempts, 100ms base, 2s cap, multiplier 2, every error retryable.
    pub fn new() -> Self {
        Self::from_config(&RetryConfig::default())
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            backoff_multiplier: config.backoff_multiplier,
            is_retryable: Arc::new(|_| true),
            on_retry: None,
        }
    }

    /// Total attempts including the first; values below 1 are raised to 1.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Only errors for which `predicate` returns true are retried.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(predicate);
        self
    }

    /// Observer invoked with the failed attempt number before each wait.
    pub fn on_retry<O>(mut self, observer: O) -> Self
    where
        O: Fn(u32, &E) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay bound (before jitter) after failed attempt `attempt`.
    pub fn delay_bound(&self, attempt: u32) -> Duration {
        backoff_bound(attempt, self.base_delay, self.backoff_multiplier, self.max_delay)
    }

    fn is_retryable(&self, error: &E) -> bool {
        (self.is_retryable)(error)
    }

    fn notify_retry(&self, attempt: u32, error: &E) {
        if let Some(observer) = &self.on_retry {
            if catch_unwind(AssertUnwindSafe(|| observer(attempt, error))).is_err() {
                warn!(attempt, "on_retry observer panicked; ignoring");
            }
        }
    }
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            is_retryable: self.is_retryable.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Caps retries to a share of recent traffic so retries cannot amplify an outage.
///
/// Within each window, retries are allowed while
/// `retries < max(min_retries, requests × ratio)`.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f32,
    min_retries: u32,
    window: Duration,
    clock: SharedClock,
    state: Mutex<BudgetWindow>,
}

#[derive(Debug)]
struct BudgetWindow {
    started_at: Instant,
    requests: u64,
    retries: u64,
}

impl RetryBudget {
    pub fn new(ratio: f32, min_retries: u32, window: Duration) -> Self {
        Self::with_clock(ratio, min_retries, window, tokio_clock())
    }

    pub fn with_clock(ratio: f32, min_retries: u32, window: Duration, clock: SharedClock) -> Self {
        let started_at = clock.now();
        Self {
            ratio: ratio.clamp(0.0, 1.0),
            min_retries,
            window,
            clock,
            state: Mutex::new(BudgetWindow {
                started_at,
                requests: 0,
                retries: 0,
            }),
        }
    }

    /// Budget described by `config`, or `None` when budgeting is disabled.
    pub fn from_config(config: &RetryConfig) -> Option<Self> {
        config.budget_enabled.then(|| {
            Self::new(
                config.budget_ratio,
                config.budget_min_retries,
                config.budget_window(),
            )
        })
    }

    /// Count a first attempt.
    pub fn record_request(&self) {
        let mut state = self.state.lock().expect("retry budget mutex poisoned");
        self.roll(&mut state);
        state.requests += 1;
    }

    /// Reserve one retry; false when the budget is spent.
    pub fn try_withdraw(&self) -> bool {
        let mut state = self.state.lock().expect("retry budget mutex poisoned");
        self.roll(&mut state);
        if state.retries < self.allowed(&state) {
            state.retries += 1;
            true
        } else {
            false
        }
    }

    /// Return a retry reserved by [`try_withdraw`](Self::try_withdraw) that was never made.
    pub fn refund(&self) {
        let mut state = self.state.lock().expect("retry budget mutex poisoned");
        self.roll(&mut state);
        state.retries = state.retries.saturating_sub(1);
    }

    /// Retries still available in the current window.
    pub fn remaining(&self) -> u64 {
        let mut state = self.state.lock().expect("retry budget mutex poisoned");
        self.roll(&mut state);
        self.allowed(&state).saturating_sub(state.retries)
    }

    fn allowed(&self, state: &BudgetWindow) -> u64 {
        let proportional = (state.requests as f64 * f64::from(self.ratio)) as u64;
        proportional.max(u64::from(self.min_retries))
    }

    fn roll(&self, state: &mut BudgetWindow) {
        let now = self.clock.now();
        if now.saturating_duration_since(state.started_at) >= self.window {
            state.started_at = now;
            state.requests = 0;
            state.retries = 0;
        }
    }
}

/// Runs operations with retries.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    clock: SharedClock,
    budget: Option<Arc<RetryBudget>>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::with_clock(tokio_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            clock,
            budget: None,
        }
    }

    /// Share a retry budget with every call made through this executor.
    pub fn with_budget(mut self, budget: Arc<RetryBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn budget(&self) -> Option<&Arc<RetryBudget>> {
        self.budget.as_ref()
    }

    /// Run `operation` until it succeeds, fails terminally, or attempts run out.
    pub async fn run<F, Fut, T, E>(
        &self,
        operation: F,
        options: &RetryOptions<E>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run_cancellable(operation, options, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but a cancelled `token` abandons any pending wait.
    pub async fn run_cancellable<F, Fut, T, E>(
        &self,
        mut operation: F,
        options: &RetryOptions<E>,
        token: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if let Some(budget) = &self.budget {
            budget.record_request();
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !options.is_retryable(&error) {
                debug!(attempt, error = %error, "Non-retryable error");
                metrics::record_retry("non_retryable");
                return Err(RetryError::NonRetryable(error));
            }

            if attempt >= options.max_attempts {
                warn!(
                    attempts = attempt,
                    error = %error,
                    "Max attempts exhausted"
                );
                metrics::record_retry("exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            if let Some(budget) = &self.budget {
                if !budget.try_withdraw() {
                    warn!(attempts = attempt, error = %error, "Retry budget exhausted");
                    metrics::record_retry("budget");
                    return Err(RetryError::BudgetExhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
            }

            let bound = options.delay_bound(attempt);
            let delay = full_jitter(bound, &mut rand::thread_rng());
            warn!(
                attempt,
                delay = ?delay,
                error = %error,
                "Attempt failed, retrying"
            );
            options.notify_retry(attempt, &error);
            metrics::record_retry("scheduled");

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    if let Some(budget) = &self.budget {
                        budget.refund();
                    }
                    debug!(attempts = attempt, "Retry wait cancelled");
                    metrics::record_retry("cancelled");
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                _ = self.clock.sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `operation` with retries on the tokio clock.
pub async fn with_retry<F, Fut, T, E>(
    operation: F,
    options: &RetryOptions<E>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    RetryExecutor::new().run(operation, options).await
}
