//! Token bucket rate limiter.
//!
//! The bucket holds up to `capacity` tokens and refills continuously at
//! `capacity / window`. Refill and deduction happen under the same mutex, so
//! concurrent callers can never observe or take more than `capacity` tokens.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::{tokio_clock, SharedClock};
use crate::config::RateLimitConfig;
use crate::error::RateLimitError;
use crate::observability::metrics;

/// Token bucket rate limiter.
///
/// # Example
/// ```ignore
/// let limiter = RateLimiter::new("mail-api", 10, Duration::from_secs(1)); // 10 ops/sec
/// if limiter.try_acquire() {
///     // Operation allowed
/// } else {
///     // Rate limited
/// }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: u32,
    window: Duration,
    /// Tokens per second.
    refill_rate: f64,
    clock: SharedClock,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a full bucket on the tokio clock.
    ///
    /// A zero capacity is raised to 1 and a zero window to 1ms.
    pub fn new(name: impl Into<String>, capacity: u32, window: Duration) -> Self {
        Self::with_clock(name, capacity, window, tokio_clock())
    }

    pub fn with_clock(
        name: impl Into<String>,
        capacity: u32,
        window: Duration,
        clock: SharedClock,
    ) -> Self {
        let capacity = capacity.max(1);
        let window = window.max(Duration::from_millis(1));
        let last_refill = clock.now();
        Self {
            name: name.into(),
            capacity,
            window,
            refill_rate: f64::from(capacity) / window.as_secs_f64(),
            clock,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(capacity),
                last_refill,
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self::new(name, config.capacity, config.window())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whole tokens available right now.
    pub fn available(&self) -> u32 {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        bucket.tokens.floor() as u32
    }

    /// Take one token if available, without waiting.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n(1)
    }

    /// Take `n` tokens if all are available, without waiting.
    ///
    /// On failure the bucket is left unchanged.
    pub fn try_acquire_n(&self, n: u32) -> bool {
        match self.take_or_wait(n) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(limiter = %self.name, requested = n, "Rate limiter denied");
                metrics::record_rate_limited(&self.name);
                false
            }
        }
    }

    /// Wait for one token, up to `timeout` when given.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<(), RateLimitError> {
        self.acquire_n(1, timeout).await
    }

    /// Wait for `n` tokens, up to `timeout` when given.
    pub async fn acquire_n(&self, n: u32, timeout: Option<Duration>) -> Result<(), RateLimitError> {
        self.acquire_cancellable(n, timeout, &CancellationToken::new())
            .await
    }

    /// Wait for `n` tokens until they are granted, `timeout` elapses, or
    /// `token` is cancelled. Nothing is deducted unless the call succeeds.
    pub async fn acquire_cancellable(
        &self,
        n: u32,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        if n > self.capacity {
            return Err(RateLimitError::ExceedsCapacity {
                limiter: self.name.clone(),
                requested: n,
                capacity: self.capacity,
            });
        }

        let started = self.clock.now();
        let deadline = timeout.map(|t| started + t);

        loop {
            let wait = match self.take_or_wait(n) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            let now = self.clock.now();
            if let Some(deadline) = deadline {
                // Tokens only arrive at the refill rate, so a wait past the
                // deadline cannot succeed.
                if now + wait > deadline {
                    let waited = now.saturating_duration_since(started);
                    tracing::warn!(
                        limiter = %self.name,
                        requested = n,
                        waited = ?waited,
                        "Rate limiter acquire timed out"
                    );
                    metrics::record_rate_limited(&self.name);
                    return Err(RateLimitError::Timeout {
                        limiter: self.name.clone(),
                        requested: n,
                        waited,
                    });
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(RateLimitError::Cancelled { limiter: self.name.clone() });
                }
                _ = self.clock.sleep(wait) => {}
            }
        }
    }

    /// Deduct `n` tokens, or report how long until they could be available.
    fn take_or_wait(&self, n: u32) -> Result<(), Duration> {
        let mut bucket = self.lock();
        self.refill(&mut bucket);

        let needed = f64::from(n);
        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            tracing::trace!(
                limiter = %self.name,
                acquired = n,
                remaining = bucket.tokens,
                "Rate limiter acquired"
            );
            Ok(())
        } else {
            let deficit = needed - bucket.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_rate);
            Err(wait.max(Duration::from_millis(1)))
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed.is_zero() {
            return;
        }
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_rate).min(f64::from(self.capacity));
        bucket.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().expect("rate limiter mutex poisoned")
    }
}
