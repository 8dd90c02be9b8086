//! Resilience primitives for async services: retries with backoff, circuit
//! breakers, token-bucket rate limiters and periodic health monitoring.

pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod observability;
pub mod rate_limit;
pub mod resilience;

pub use clock::{Clock, ManualClock, SharedClock, TokioClock};
pub use config::ToolkitConfig;
pub use error::{BoxError, CircuitError, HealthError, RateLimitError, RetryError};
pub use health::{CheckOptions, HealthMonitor, HealthSnapshot, HealthStatus};
pub use rate_limit::{KeyedRateLimiter, RateLimiter};
pub use resilience::{
    with_retry, BreakerState, CircuitBreaker, CircuitBreakerOptions, RetryBudget, RetryExecutor,
    RetryOptions,
};
