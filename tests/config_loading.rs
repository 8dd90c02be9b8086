//! Building components from a configuration file.

use std::fs;
use std::time::Duration;

use resilience_kit::config::{load_config, ConfigError, LogFormat};
use resilience_kit::{
    CheckOptions, CircuitBreaker, KeyedRateLimiter, RateLimiter, RetryBudget, RetryOptions,
};

const CONFIG: &str = r#"
[retry]
max_attempts = 4
base_delay_ms = 50
max_delay_ms = 400
budget_enabled = true
budget_ratio = 0.2

[circuit_breaker]
failure_threshold = 3
open_duration_ms = 10000

[rate_limit]
capacity = 5
window_ms = 1000

[keyed_rate_limit]
capacity = 2
idle_ttl_ms = 30000

[health]
interval_ms = 10000
timeout_ms = 2000

[observability]
log_format = "json"
metrics_enabled = false
"#;

#[test]
fn test_components_from_file() {
    let path = std::env::temp_dir().join(format!("resilience-kit-{}.toml", std::process::id()));
    fs::write(&path, CONFIG).unwrap();
    let config = load_config(&path);
    let _ = fs::remove_file(&path);
    let config = config.unwrap();

    let retry: RetryOptions<std::io::Error> = RetryOptions::from_config(&config.retry);
    assert_eq!(retry.attempts(), 4);
    assert_eq!(retry.delay_bound(1), Duration::from_millis(50));
    assert_eq!(retry.delay_bound(5), Duration::from_millis(400));
    assert!(RetryBudget::from_config(&config.retry).is_some());

    let breaker = CircuitBreaker::from_config("db", &config.circuit_breaker);
    assert_eq!(breaker.options().failure_threshold, 3);
    assert_eq!(breaker.options().open_duration, Duration::from_secs(10));
    assert_eq!(breaker.options().half_open_max_attempts, 2);

    let limiter = RateLimiter::from_config("api", &config.rate_limit);
    assert_eq!(limiter.capacity(), 5);
    assert_eq!(limiter.window(), Duration::from_secs(1));

    let keyed: KeyedRateLimiter = KeyedRateLimiter::from_config("tenants", &config.keyed_rate_limit);
    assert!(keyed.try_acquire_n("acme", 2));
    assert!(!keyed.try_acquire("acme"));

    let check = CheckOptions::from_config(&config.health);
    assert_eq!(check.interval, Duration::from_secs(10));
    assert_eq!(check.timeout, Duration::from_secs(2));
    assert!(!check.critical);

    assert_eq!(config.observability.log_format, LogFormat::Json);
    assert!(!config.observability.metrics_enabled);
}

#[test]
fn test_invalid_file_reports_all_violations() {
    let path = std::env::temp_dir().join(format!("resilience-kit-bad-{}.toml", std::process::id()));
    fs::write(
        &path,
        "[circuit_breaker]\nfailure_threshold = 0\n\n[rate_limit]\ncapacity = 0\n",
    )
    .unwrap();
    let result = load_config(&path);
    let _ = fs::remove_file(&path);

    match result {
        Err(ConfigError::Validation(errors)) => {
            let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
            assert_eq!(fields, vec!["circuit_breaker.failure_threshold", "rate_limit.capacity"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_missing_file() {
    let path = std::env::temp_dir().join("resilience-kit-does-not-exist.toml");
    assert!(matches!(load_config(&path), Err(ConfigError::Io(_))));
}
