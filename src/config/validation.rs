//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. All violations are reported, not just the first.

use std::fmt;

use crate::config::schema::ToolkitConfig;

/// A single semantic violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ToolkitConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.base_delay_ms",
            format!(
                "must not exceed retry.max_delay_ms ({} > {})",
                retry.base_delay_ms, retry.max_delay_ms
            ),
        ));
    }
    if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new(
            "retry.backoff_multiplier",
            "must be a number >= 1.0",
        ));
    }
    if !(0.0..=1.0).contains(&retry.budget_ratio) {
        errors.push(ValidationError::new("retry.budget_ratio", "must be within [0, 1]"));
    }
    if retry.budget_enabled && retry.budget_window_ms == 0 {
        errors.push(ValidationError::new("retry.budget_window_ms", "must be > 0"));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be at least 1",
        ));
    }
    if breaker.open_duration_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.open_duration_ms", "must be > 0"));
    }
    if breaker.half_open_max_attempts == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_max_attempts",
            "must be at least 1",
        ));
    }

    if config.rate_limit.capacity == 0 {
        errors.push(ValidationError::new("rate_limit.capacity", "must be at least 1"));
    }
    if config.rate_limit.window_ms == 0 {
        errors.push(ValidationError::new("rate_limit.window_ms", "must be > 0"));
    }

    let keyed = &config.keyed_rate_limit;
    if keyed.capacity == 0 {
        errors.push(ValidationError::new("keyed_rate_limit.capacity", "must be at least 1"));
    }
    if keyed.window_ms == 0 {
        errors.push(ValidationError::new("keyed_rate_limit.window_ms", "must be > 0"));
    }
    if keyed.idle_ttl_ms == 0 {
        errors.push(ValidationError::new("keyed_rate_limit.idle_ttl_ms", "must be > 0"));
    }
    if keyed.sweep_interval_ms == 0 {
        errors.push(ValidationError::new(
            "keyed_rate_limit.sweep_interval_ms",
            "must be > 0",
        ));
    }

    let health = &config.health;
    if health.interval_ms == 0 {
        errors.push(ValidationError::new("health.interval_ms", "must be > 0"));
    }
    if health.timeout_ms == 0 {
        errors.push(ValidationError::new("health.timeout_ms", "must be > 0"));
    } else if health.timeout_ms > health.interval_ms {
        errors.push(ValidationError::new(
            "health.timeout_ms",
            "must not exceed health.interval_ms",
        ));
    }

    if config.observability.log_level.trim().is_empty() {
        errors.push(ValidationError::new("observability.log_level", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
