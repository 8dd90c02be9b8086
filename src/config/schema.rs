//! Configuration schema definitions.
//!
//! Every component can be built from its section via a `from_config`
//! constructor. All types derive Serde traits for deserialization from TOML.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the toolkit.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Retry executor defaults.
    pub retry: RetryConfig,

    /// Circuit breaker defaults (one breaker per guarded dependency).
    pub circuit_breaker: CircuitBreakerConfig,

    /// Global rate limiter budget.
    pub rate_limit: RateLimitConfig,

    /// Per-key rate limiter budget and eviction policy.
    pub keyed_rate_limit: KeyedRateLimitConfig,

    /// Health monitor defaults.
    pub health: HealthConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delay bounds.
    pub backoff_multiplier: f64,

    /// Enable the shared retry budget.
    pub budget_enabled: bool,

    /// Share of requests that can be retries (e.g. 0.1 for 10%).
    pub budget_ratio: f32,

    /// Retries always allowed per budget window regardless of traffic.
    pub budget_min_retries: u32,

    /// Budget accounting window in milliseconds.
    pub budget_window_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn budget_window(&self) -> Duration {
        Duration::from_millis(self.budget_window_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            backoff_multiplier: 2.0,
            budget_enabled: false,
            budget_ratio: 0.1,
            budget_min_retries: 10,
            budget_window_ms: 10_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial call, in milliseconds.
    pub open_duration_ms: u64,

    /// Successful trial calls needed to close the circuit again.
    pub half_open_max_attempts: u32,
}

impl CircuitBreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
            half_open_max_attempts: 2,
        }
    }
}

/// Token bucket configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum tokens (burst size).
    pub capacity: u32,

    /// Time to refill an empty bucket, in milliseconds.
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            window_ms: 1000,
        }
    }
}

/// Per-key rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct KeyedRateLimitConfig {
    /// Bucket capacity for each key.
    pub capacity: u32,

    /// Refill window for each key, in milliseconds.
    pub window_ms: u64,

    /// Buckets unused for this long are evicted, in milliseconds.
    pub idle_ttl_ms: u64,

    /// Interval of the background eviction sweep, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl KeyedRateLimitConfig {
    pub fn budget(&self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.capacity,
            window_ms: self.window_ms,
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for KeyedRateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            window_ms: 60_000,
            idle_ttl_ms: 600_000,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Health check defaults.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between runs of a check, in milliseconds.
    pub interval_ms: u64,

    /// Maximum duration of a single run, in milliseconds.
    pub timeout_ms: u64,
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 5_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Record metrics through the `metrics` facade.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}
