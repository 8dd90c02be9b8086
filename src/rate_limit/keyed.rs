//! Per-key rate limiting.
//!
//! One [`RateLimiter`] per key, created on first use and evicted once the key
//! has been idle for longer than the TTL. A fresh bucket starts full, so
//! eviction only forgets accumulated debt.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::{tokio_clock, SharedClock};
use crate::config::KeyedRateLimitConfig;
use crate::error::RateLimitError;
use crate::observability::metrics;
use crate::rate_limit::bucket::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Budget {
    capacity: u32,
    window: Duration,
}

#[derive(Debug)]
struct KeyedBucket {
    limiter: RateLimiter,
    /// Milliseconds since the keyed limiter's origin.
    last_used_ms: AtomicU64,
    in_flight: AtomicUsize,
}

/// Keeps a bucket pinned while an acquisition is running.
struct Lease {
    bucket: Arc<KeyedBucket>,
    origin: Instant,
    clock: SharedClock,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let now_ms = elapsed_ms(self.origin, self.clock.now());
        self.bucket.last_used_ms.store(now_ms, Ordering::Release);
        self.bucket.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

fn elapsed_ms(origin: Instant, now: Instant) -> u64 {
    u64::try_from(now.saturating_duration_since(origin).as_millis()).unwrap_or(u64::MAX)
}

/// Rate limiter multiplexed over a dynamic key space.
#[derive(Debug)]
pub struct KeyedRateLimiter<K = String>
where
    K: Eq + Hash,
{
    name: String,
    budget: Budget,
    overrides: HashMap<K, Budget>,
    idle_ttl: Duration,
    sweep_interval: Duration,
    clock: SharedClock,
    origin: Instant,
    buckets: DashMap<K, Arc<KeyedBucket>>,
}

impl<K> KeyedRateLimiter<K>
where
    K: Eq + Hash,
{
    /// Every key gets `capacity` tokens per `window`; idle keys are dropped after `idle_ttl`.
    pub fn new(name: impl Into<String>, capacity: u32, window: Duration, idle_ttl: Duration) -> Self {
        Self::with_clock(name, capacity, window, idle_ttl, tokio_clock())
    }

    /// The sweep interval defaults to `idle_ttl`, raised to at least 1ms.
    pub fn with_clock(
        name: impl Into<String>,
        capacity: u32,
        window: Duration,
        idle_ttl: Duration,
        clock: SharedClock,
    ) -> Self {
        let origin = clock.now();
        Self {
            name: name.into(),
            budget: Budget { capacity, window },
            overrides: HashMap::new(),
            idle_ttl,
            sweep_interval: idle_ttl.max(Duration::from_millis(1)),
            clock,
            origin,
            buckets: DashMap::new(),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &KeyedRateLimitConfig) -> Self {
        let budget = config.budget();
        Self::new(name, budget.capacity, budget.window(), config.idle_ttl())
            .sweep_interval(config.sweep_interval())
    }

    /// Give `key` its own budget instead of the shared one.
    pub fn with_override(mut self, key: K, capacity: u32, window: Duration) -> Self {
        self.overrides.insert(key, Budget { capacity, window });
        self
    }

    /// Interval used by [`spawn_evictor`](Self::spawn_evictor).
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.buckets.contains_key(key)
    }

    /// Take one token from `key`'s bucket without waiting.
    pub fn try_acquire<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        self.try_acquire_n(key, 1)
    }

    pub fn try_acquire_n<Q>(&self, key: &Q, n: u32) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let lease = self.checkout(key);
        lease.bucket.limiter.try_acquire_n(n)
    }

    /// Wait for one token from `key`'s bucket, up to `timeout` when given.
    pub async fn acquire<Q>(&self, key: &Q, timeout: Option<Duration>) -> Result<(), RateLimitError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        self.acquire_n(key, 1, timeout).await
    }

    pub async fn acquire_n<Q>(
        &self,
        key: &Q,
        n: u32,
        timeout: Option<Duration>,
    ) -> Result<(), RateLimitError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        self.acquire_cancellable(key, n, timeout, &CancellationToken::new())
            .await
    }

    pub async fn acquire_cancellable<Q>(
        &self,
        key: &Q,
        n: u32,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<(), RateLimitError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let lease = self.checkout(key);
        lease
            .bucket
            .limiter
            .acquire_cancellable(n, timeout, token)
            .await
    }

    /// Remove buckets idle for longer than the TTL. Returns how many were removed.
    ///
    /// Buckets with an acquisition in progress are kept.
    pub fn evict_idle(&self) -> usize {
        let now_ms = elapsed_ms(self.origin, self.clock.now());
        let ttl_ms = u64::try_from(self.idle_ttl.as_millis()).unwrap_or(u64::MAX);
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| {
            bucket.in_flight.load(Ordering::Acquire) > 0
                || now_ms.saturating_sub(bucket.last_used_ms.load(Ordering::Acquire)) < ttl_ms
        });

        let after = self.buckets.len();
        let evicted = before.saturating_sub(after);
        if evicted > 0 {
            tracing::debug!(limiter = %self.name, evicted, remaining = after, "Evicted idle rate limit buckets");
        }
        metrics::record_keyed_buckets(&self.name, after);
        evicted
    }

    /// Pin `key`'s bucket, creating it if needed.
    ///
    /// The in-flight count is raised while the map shard is locked, so a
    /// concurrent sweep either runs before the bucket exists or sees it pinned.
    fn checkout<Q>(&self, key: &Q) -> Lease
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let now_ms = elapsed_ms(self.origin, self.clock.now());

        let bucket = match self.buckets.get(key) {
            Some(existing) => {
                existing.in_flight.fetch_add(1, Ordering::AcqRel);
                existing.last_used_ms.store(now_ms, Ordering::Release);
                Arc::clone(existing.value())
            }
            None => {
                let budget = self.overrides.get(key).copied().unwrap_or(self.budget);
                let entry = self.buckets.entry(key.to_owned()).or_insert_with(|| {
                    Arc::new(KeyedBucket {
                        limiter: RateLimiter::with_clock(
                            self.name.clone(),
                            budget.capacity,
                            budget.window,
                            self.clock.clone(),
                        ),
                        last_used_ms: AtomicU64::new(now_ms),
                        in_flight: AtomicUsize::new(0),
                    })
                });
                entry.in_flight.fetch_add(1, Ordering::AcqRel);
                entry.last_used_ms.store(now_ms, Ordering::Release);
                let bucket = Arc::clone(entry.value());
                drop(entry);
                metrics::record_keyed_buckets(&self.name, self.buckets.len());
                bucket
            }
        };

        Lease {
            bucket,
            origin: self.origin,
            clock: self.clock.clone(),
        }
    }
}

impl<K> KeyedRateLimiter<K>
where
    K: Eq + Hash + Send + Sync + 'static,
{
    /// Run [`evict_idle`](Self::evict_idle) every sweep interval until `token`
    /// is cancelled or the limiter is dropped.
    pub fn spawn_evictor(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else { break };
                        limiter.evict_idle();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::thread;

    const TTL: Duration = Duration::from_secs(60);

    fn keyed(clock: &ManualClock) -> KeyedRateLimiter {
        KeyedRateLimiter::with_clock("tenants", 3, Duration::from_secs(1), TTL, clock.shared())
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = ManualClock::new();
        let limiter = keyed(&clock);

        for _ in 0..3 {
            assert!(limiter.try_acquire("A"));
        }
        assert!(!limiter.try_acquire("A"));
        assert!(limiter.try_acquire("B"));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_idle_buckets_are_evicted_and_recreated_full() {
        let clock = ManualClock::new();
        let limiter = keyed(&clock);
        assert!(limiter.try_acquire_n("A", 3));
        assert!(limiter.try_acquire("B"));

        clock.advance(Duration::from_secs(30));
        assert!(limiter.try_acquire("B"));
        assert_eq!(limiter.evict_idle(), 0);

        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.evict_idle(), 1);
        assert!(!limiter.contains_key("A"));
        assert!(limiter.contains_key("B"));

        assert!(limiter.try_acquire_n("A", 3));
    }

    #[test]
    fn test_in_flight_bucket_survives_sweep() {
        let clock = ManualClock::new();
        let limiter = keyed(&clock);

        let lease = limiter.checkout("A");
        clock.advance(TTL * 2);
        assert_eq!(limiter.evict_idle(), 0);
        assert!(limiter.contains_key("A"));

        drop(lease);
        assert_eq!(limiter.evict_idle(), 0);
        clock.advance(TTL);
        assert_eq!(limiter.evict_idle(), 1);
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_override_budget() {
        let clock = ManualClock::new();
        let limiter = keyed(&clock).with_override("vip".to_string(), 10, Duration::from_secs(1));

        assert!(limiter.try_acquire_n("vip", 10));
        assert!(!limiter.try_acquire_n("guest", 4));
        assert!(limiter.try_acquire_n("guest", 3));
    }

    #[test]
    fn test_concurrent_first_use_creates_one_bucket() {
        let clock = ManualClock::new();
        let limiter = Arc::new(keyed(&clock));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || limiter.try_acquire("shared"))
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(granted, 3);
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_per_key_times_out() {
        let clock = ManualClock::new();
        let limiter = keyed(&clock);
        assert!(limiter.try_acquire_n("A", 3));

        let err = limiter
            .acquire("A", Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::Timeout { .. }));
        limiter.acquire("B", Some(Duration::from_millis(10))).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_evictor() {
        let limiter = Arc::new(
            KeyedRateLimiter::<String>::new("api", 5, Duration::from_secs(1), Duration::from_secs(2))
                .sweep_interval(Duration::from_millis(500)),
        );
        let token = CancellationToken::new();
        let sweeper = limiter.spawn_evictor(token.clone());

        assert!(limiter.try_acquire("A"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(limiter.is_empty());

        token.cancel();
        sweeper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_evictor_sweeps_every_millisecond() {
        let limiter = Arc::new(KeyedRateLimiter::<String>::new(
            "zero-ttl",
            1,
            Duration::from_secs(1),
            Duration::ZERO,
        ));
        let token = CancellationToken::new();
        let sweeper = limiter.spawn_evictor(token.clone());

        assert!(limiter.try_acquire("A"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(limiter.is_empty());

        token.cancel();
        sweeper.await.unwrap();
    }
}
