//! Check results and the aggregated health view.
//!
//! # Aggregation
//! ```text
//! no check has completed                 → Unhealthy
//! any critical check last failed         → Unhealthy
//! any non-critical check last failed     → Degraded
//! some checks still pending              → Degraded
//! otherwise                              → Healthy
//! ```

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Overall or per-check health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a check run was recorded as unhealthy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckFailure {
    #[error("check timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),

    #[error("check panicked: {0}")]
    Panicked(String),
}

/// Outcome of the most recent run of one check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub failure: Option<CheckFailure>,
    pub duration: Duration,
    pub checked_at: Instant,
    /// Failed runs in a row, including this one. Zero after a success.
    pub consecutive_failures: u32,
}

impl CheckResult {
    pub fn is_healthy(&self) -> bool {
        self.failure.is_none()
    }
}

/// Serializable view of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub name: String,
    pub critical: bool,
    /// `None` until the check has completed once.
    pub healthy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Age of the last result at snapshot time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_ms: Option<u64>,
    pub consecutive_failures: u32,
}

impl CheckReport {
    pub(crate) fn new(name: &str, critical: bool, last: Option<&CheckResult>, now: Instant) -> Self {
        match last {
            None => Self {
                name: name.to_string(),
                critical,
                healthy: None,
                message: None,
                duration_ms: None,
                age_ms: None,
                consecutive_failures: 0,
            },
            Some(result) => Self {
                name: name.to_string(),
                critical,
                healthy: Some(result.is_healthy()),
                message: result.failure.as_ref().map(ToString::to_string),
                duration_ms: Some(millis(result.duration)),
                age_ms: Some(millis(now.saturating_duration_since(result.checked_at))),
                consecutive_failures: result.consecutive_failures,
            },
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Aggregated health, computed when requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub checks: Vec<CheckReport>,
}

impl HealthSnapshot {
    pub(crate) fn new(checks: Vec<CheckReport>, uptime: Duration) -> Self {
        Self {
            status: aggregate(&checks),
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: uptime.as_secs(),
            checks,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn check(&self, name: &str) -> Option<&CheckReport> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Fold per-check results into an overall status.
pub fn aggregate(checks: &[CheckReport]) -> HealthStatus {
    if checks.iter().all(|c| c.healthy.is_none()) {
        return HealthStatus::Unhealthy;
    }

    let failed = |critical: bool| {
        checks
            .iter()
            .any(|c| c.critical == critical && c.healthy == Some(false))
    };

    if failed(true) {
        HealthStatus::Unhealthy
    } else if failed(false) || checks.iter().any(|c| c.healthy.is_none()) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, critical: bool, healthy: Option<bool>) -> CheckReport {
        CheckReport {
            name: name.to_string(),
            critical,
            healthy,
            message: None,
            duration_ms: None,
            age_ms: None,
            consecutive_failures: 0,
        }
    }

    #[test]
    fn test_no_completed_checks_is_unhealthy() {
        assert_eq!(aggregate(&[]), HealthStatus::Unhealthy);
        assert_eq!(
            aggregate(&[report("db", true, None), report("cache", false, None)]),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_all_healthy() {
        let checks = [report("db", true, Some(true)), report("cache", false, Some(true))];
        assert_eq!(aggregate(&checks), HealthStatus::Healthy);
    }

    #[test]
    fn test_critical_failure_dominates() {
        let checks = [
            report("db", true, Some(false)),
            report("cache", false, Some(true)),
            report("queue", false, Some(true)),
        ];
        assert_eq!(aggregate(&checks), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_non_critical_failure_degrades() {
        let checks = [report("db", true, Some(true)), report("cache", false, Some(false))];
        assert_eq!(aggregate(&checks), HealthStatus::Degraded);
    }

    #[test]
    fn test_pending_check_degrades() {
        let checks = [report("db", true, Some(true)), report("cache", false, None)];
        assert_eq!(aggregate(&checks), HealthStatus::Degraded);
    }

    #[test]
    fn test_report_from_result() {
        let now = Instant::now();
        let result = CheckResult {
            failure: Some(CheckFailure::Timeout(Duration::from_millis(250))),
            duration: Duration::from_millis(250),
            checked_at: now,
            consecutive_failures: 2,
        };
        let report = CheckReport::new("db", true, Some(&result), now + Duration::from_secs(1));

        assert_eq!(report.healthy, Some(false));
        assert_eq!(report.message.as_deref(), Some("check timed out after 250ms"));
        assert_eq!(report.duration_ms, Some(250));
        assert_eq!(report.age_ms, Some(1000));
        assert_eq!(report.consecutive_failures, 2);
    }
}
