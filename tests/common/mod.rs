//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Error returned by [`FlakyDependency`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream unavailable")]
    Unavailable,
    #[error("request rejected")]
    Rejected,
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Unavailable)
    }
}

/// Simulated dependency that fails its first `failures` calls.
#[derive(Debug, Clone)]
pub struct FlakyDependency {
    calls: Arc<AtomicU32>,
    failures: Arc<AtomicU32>,
    error: UpstreamError,
}

impl FlakyDependency {
    pub fn failing(failures: u32) -> Self {
        Self::failing_with(failures, UpstreamError::Unavailable)
    }

    pub fn failing_with(failures: u32, error: UpstreamError) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures: Arc::new(AtomicU32::new(failures)),
            error,
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    /// Make every subsequent call succeed.
    pub fn recover(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn call(&self) -> Result<&'static str, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok("ok");
        }
        if remaining != u32::MAX {
            self.failures.fetch_sub(1, Ordering::SeqCst);
        }
        Err(self.error.clone())
    }
}
