//! Metrics recording.
//!
//! # Metrics
//! - `resilience_breaker_transitions_total` (counter): transitions by breaker, target state
//! - `resilience_breaker_rejections_total` (counter): calls rejected while open
//! - `resilience_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `resilience_retries_total` (counter): retry decisions by outcome
//! - `resilience_rate_limited_total` (counter): denied acquisitions by limiter
//! - `resilience_keyed_buckets` (gauge): live buckets per keyed limiter
//! - `resilience_health_check_duration_seconds` (histogram): check latency
//! - `resilience_health_check_status` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; the host installs the exporter
//! - Recording can be switched off globally from `ObservabilityConfig`

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::config::ObservabilityConfig;
use crate::health::HealthStatus;
use crate::resilience::circuit_breaker::BreakerState;

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Apply the metrics switch from configuration.
pub fn configure(config: &ObservabilityConfig) {
    ENABLED.store(config.metrics_enabled, Ordering::Relaxed);
}

fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

fn state_value(state: BreakerState) -> f64 {
    match state {
        BreakerState::Closed => 0.0,
        BreakerState::Open => 1.0,
        BreakerState::HalfOpen => 2.0,
    }
}

pub fn record_breaker_transition(breaker: &str, to: BreakerState) {
    if !enabled() {
        return;
    }
    counter!(
        "resilience_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
    gauge!("resilience_breaker_state", "breaker" => breaker.to_string()).set(state_value(to));
}

pub fn record_breaker_rejected(breaker: &str) {
    if !enabled() {
        return;
    }
    counter!("resilience_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_retry(outcome: &'static str) {
    if !enabled() {
        return;
    }
    counter!("resilience_retries_total", "outcome" => outcome).increment(1);
}

pub fn record_rate_limited(limiter: &str) {
    if !enabled() {
        return;
    }
    counter!("resilience_rate_limited_total", "limiter" => limiter.to_string()).increment(1);
}

pub fn record_keyed_buckets(limiter: &str, count: usize) {
    if !enabled() {
        return;
    }
    gauge!("resilience_keyed_buckets", "limiter" => limiter.to_string()).set(count as f64);
}

pub fn record_check(check: &str, healthy: bool, duration: Duration) {
    if !enabled() {
        return;
    }
    histogram!(
        "resilience_health_check_duration_seconds",
        "check" => check.to_string()
    )
    .record(duration.as_secs_f64());
    gauge!("resilience_health_check_status", "check" => check.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_overall_health(status: HealthStatus) {
    if !enabled() {
        return;
    }
    gauge!("resilience_health_status").set(match status {
        HealthStatus::Healthy => 2.0,
        HealthStatus::Degraded => 1.0,
        HealthStatus::Unhealthy => 0.0,
    });
}
