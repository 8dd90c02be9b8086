//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → circuit_breaker.rs (fail fast while the dependency is known bad)
//!     → On failure: retries.rs (classify, back off, try again)
//!     → backoff.rs (exponential bound, full jitter)
//! ```
//!
//! # Design Decisions
//! - Callers choose the composition order; nothing here wraps anything else
//! - Breaker counts consecutive failures, not a windowed rate
//! - Retry waits are timers, cancellable through a token or by dropping the future
//! - A rejected call never reaches the operation

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, CircuitBreakerOptions};
pub use retries::{with_retry, RetryBudget, RetryExecutor, RetryOptions};
