//! Time source used by every component.
//!
//! Production code runs on [`TokioClock`], which reads `tokio::time::Instant`
//! and therefore also follows tokio's paused test time. [`ManualClock`] is a
//! fully virtual clock: it only moves when advanced, and its `sleep` completes
//! immediately after moving time forward by the requested amount.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::time::Instant;

/// Source of the current time and of non-blocking delays.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;

    /// A future that completes once `duration` has elapsed on this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Clock handle shared between components.
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// The default clock for production use.
pub fn tokio_clock() -> SharedClock {
    Arc::new(TokioClock)
}

/// Virtual clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<ManualInner>,
}

#[derive(Debug)]
struct ManualInner {
    origin: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManualInner {
                origin: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                sleeps: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Move virtual time forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.inner.offset.lock().expect("manual clock mutex poisoned");
        *offset += by;
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        *self.inner.offset.lock().expect("manual clock mutex poisoned")
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.inner
            .sleeps
            .lock()
            .expect("manual clock mutex poisoned")
            .clone()
    }

    /// Handle to this clock as a [`SharedClock`].
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.inner
            .sleeps
            .lock()
            .expect("manual clock mutex poisoned")
            .push(duration);
        self.advance(duration);
        future::ready(()).boxed()
    }
}
