//! Error types surfaced by the resilience primitives.
//!
//! Health check failures are not listed here as caller-facing errors: they are
//! recorded in the monitor and only observed through
//! [`HealthSnapshot`](crate::health::HealthSnapshot).

use std::time::Duration;
use thiserror::Error;

/// Boxed error accepted from health checks and other type-erased callers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal outcome of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("operation failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    /// The classifier rejected the error; it was not retried.
    #[error("non-retryable error: {0}")]
    NonRetryable(#[source] E),

    /// The shared retry budget refused another attempt.
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    BudgetExhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    /// The caller cancelled while a retry was waiting.
    #[error("retry cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::BudgetExhausted { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
            RetryError::NonRetryable(_) => 1,
        }
    }

    /// The last underlying error, if the operation produced one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::BudgetExhausted { last, .. } => {
                Some(last)
            }
            RetryError::NonRetryable(e) => Some(e),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Failure of a call guarded by a circuit breaker.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker rejected the call without invoking the operation.
    #[error("circuit '{name}' is open")]
    Open {
        name: String,
        /// Time left until a trial call may be admitted, when known.
        retry_after: Option<Duration>,
    },

    /// The operation ran and failed.
    #[error("{0}")]
    Operation(#[source] E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            CircuitError::Operation(e) => Some(e),
            CircuitError::Open { .. } => None,
        }
    }
}

/// Failure to obtain rate-limit budget.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limiter '{limiter}' timed out after {waited:?} waiting for {requested} tokens")]
    Timeout {
        limiter: String,
        requested: u32,
        waited: Duration,
    },

    #[error("rate limiter '{limiter}' cannot grant {requested} tokens (capacity {capacity})")]
    ExceedsCapacity {
        limiter: String,
        requested: u32,
        capacity: u32,
    },

    #[error("rate limiter '{limiter}' acquisition cancelled")]
    Cancelled { limiter: String },
}

/// Health monitor configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HealthError {
    #[error("health check '{0}' is already registered")]
    DuplicateCheck(String),

    #[error("invalid options for health check '{name}': {reason}")]
    InvalidOptions { name: String, reason: String },
}
