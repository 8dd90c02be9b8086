//! Periodic health checks.
//!
//! # Responsibilities
//! - Run every registered check on its own interval, bounded by its timeout
//! - Keep the latest result per check
//! - Aggregate results into a [`HealthSnapshot`] on request
//!
//! # Design Decisions
//! - One task per check; a slow or failing check never delays another
//! - Timeouts, errors and panics are recorded, never propagated
//! - Results are swapped atomically so readers never wait on a running check
//! - Timing reads tokio's timer directly rather than a [`Clock`](crate::clock::Clock);
//!   tests drive it with paused tokio time

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::HealthConfig;
use crate::error::{BoxError, HealthError};
use crate::health::state::{CheckFailure, CheckReport, CheckResult, HealthSnapshot};
use crate::observability::metrics;

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Scheduling options for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    pub interval: Duration,
    pub timeout: Duration,
    /// A failing critical check makes the whole monitor unhealthy.
    pub critical: bool,
}

impl CheckOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            critical: false,
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.interval(), config.timeout())
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self::from_config(&HealthConfig::default())
    }
}

struct CheckEntry {
    name: String,
    check: CheckFn,
    options: CheckOptions,
    last: ArcSwapOption<CheckResult>,
}

impl CheckEntry {
    async fn run(&self) {
        let started = Instant::now();
        let check = AssertUnwindSafe(async { (self.check)().await }).catch_unwind();

        let failure = match tokio::time::timeout(self.options.timeout, check).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(CheckFailure::Failed(e.to_string())),
            Ok(Err(panic)) => Some(CheckFailure::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Some(CheckFailure::Timeout(self.options.timeout)),
        };
        let duration = started.elapsed();
        let healthy = failure.is_none();

        let previous = self.last.rcu(|previous| {
            let consecutive_failures = match (&failure, previous) {
                (None, _) => 0,
                (Some(_), Some(prev)) => prev.consecutive_failures.saturating_add(1),
                (Some(_), None) => 1,
            };
            Some(Arc::new(CheckResult {
                failure: failure.clone(),
                duration,
                checked_at: Instant::now(),
                consecutive_failures,
            }))
        });

        match &failure {
            Some(failure) => tracing::warn!(
                check = %self.name,
                critical = self.options.critical,
                error = %failure,
                duration = ?duration,
                "Health check failed"
            ),
            None if previous.as_ref().is_some_and(|p| !p.is_healthy()) => {
                tracing::info!(check = %self.name, "Health check recovered")
            }
            None => tracing::trace!(check = %self.name, duration = ?duration, "Health check passed"),
        }
        metrics::record_check(&self.name, healthy, duration);
    }

    fn report(&self, now: Instant) -> CheckReport {
        let last = self.last.load_full();
        CheckReport::new(&self.name, self.options.critical, last.as_deref(), now)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Running {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    fn schedule(&mut self, entry: Arc<CheckEntry>) {
        let token = self.token.clone();
        self.tasks.push(tokio::spawn(run_schedule(entry, token)));
    }
}

async fn run_schedule(entry: Arc<CheckEntry>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(entry.options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => entry.run().await,
        }
    }
}

struct Inner {
    // Lock order: `running` before `checks`.
    running: Mutex<Option<Running>>,
    checks: RwLock<Vec<Arc<CheckEntry>>>,
    created_at: Instant,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(running) = self.running.get_mut() {
            if let Some(running) = running.take() {
                running.token.cancel();
            }
        }
    }
}

/// Runs named checks periodically and aggregates their latest results.
///
/// Cloning is cheap; clones share the same checks and schedule.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("checks", &self.check_names())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                running: Mutex::new(None),
                checks: RwLock::new(Vec::new()),
                created_at: Instant::now(),
            }),
        }
    }

    /// Add a named check.
    ///
    /// Names must be unique and both interval and timeout non-zero. A check
    /// added while the monitor is running is scheduled right away.
    pub fn register_check<F, Fut, E>(
        &self,
        name: impl Into<String>,
        check: F,
        options: CheckOptions,
    ) -> Result<(), HealthError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let name = name.into();
        if options.interval.is_zero() {
            return Err(HealthError::InvalidOptions {
                name,
                reason: "interval must be greater than zero".to_string(),
            });
        }
        if options.timeout.is_zero() {
            return Err(HealthError::InvalidOptions {
                name,
                reason: "timeout must be greater than zero".to_string(),
            });
        }

        let check: CheckFn = Arc::new(move || {
            let fut = check();
            async move { fut.await.map_err(Into::into) }.boxed()
        });

        let mut running = self.lock_running();
        let mut checks = self.inner.checks.write().expect("health registry lock poisoned");
        if checks.iter().any(|c| c.name == name) {
            return Err(HealthError::DuplicateCheck(name));
        }

        let entry = Arc::new(CheckEntry {
            name,
            check,
            options,
            last: ArcSwapOption::empty(),
        });
        tracing::debug!(
            check = %entry.name,
            interval = ?options.interval,
            timeout = ?options.timeout,
            critical = options.critical,
            "Health check registered"
        );
        checks.push(entry.clone());

        if let Some(running) = running.as_mut() {
            running.schedule(entry);
        }
        Ok(())
    }

    /// Begin running every check on its interval. The first run of each check
    /// happens immediately. Calling `start` on a running monitor does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut running = self.lock_running();
        if running.is_some() {
            return;
        }

        let checks = self.inner.checks.read().expect("health registry lock poisoned");
        let mut scheduled = Running {
            token: CancellationToken::new(),
            tasks: Vec::with_capacity(checks.len()),
        };
        for entry in checks.iter() {
            scheduled.schedule(entry.clone());
        }

        tracing::info!(checks = checks.len(), "Health monitor starting");
        *running = Some(scheduled);
    }

    /// Halt all periodic execution. Results recorded so far are kept.
    pub fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };
        running.token.cancel();
        for task in running.tasks {
            task.abort();
        }
        tracing::info!("Health monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    pub fn check_names(&self) -> Vec<String> {
        self.entries().iter().map(|c| c.name.clone()).collect()
    }

    /// Latest result per check plus the aggregated status. Never waits for a
    /// running check.
    pub fn get_status(&self) -> HealthSnapshot {
        let now = Instant::now();
        let reports = self.entries().iter().map(|c| c.report(now)).collect();
        let snapshot = HealthSnapshot::new(reports, now.saturating_duration_since(self.inner.created_at));
        metrics::record_overall_health(snapshot.status);
        snapshot
    }

    /// Run every check once, concurrently, and return the resulting snapshot.
    pub async fn check_now(&self) -> HealthSnapshot {
        let entries = self.entries();
        join_all(entries.iter().map(|entry| entry.run())).await;
        self.get_status()
    }

    fn entries(&self) -> Vec<Arc<CheckEntry>> {
        self.inner
            .checks
            .read()
            .expect("health registry lock poisoned")
            .clone()
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.inner.running.lock().expect("health monitor mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::HealthStatus;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn every_second() -> CheckOptions {
        CheckOptions::new(Duration::from_secs(1), Duration::from_millis(100))
    }

    async fn ok() -> Result<(), BoxError> {
        Ok(())
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let monitor = HealthMonitor::new();
        monitor.register_check("db", ok, every_second()).unwrap();

        let err = monitor.register_check("db", ok, every_second()).unwrap_err();
        assert_eq!(err, HealthError::DuplicateCheck("db".into()));
        assert_eq!(monitor.check_names(), vec!["db".to_string()]);
    }

    #[test]
    fn test_zero_durations_rejected() {
        let monitor = HealthMonitor::new();
        let err = monitor
            .register_check("db", ok, CheckOptions::new(Duration::ZERO, Duration::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, HealthError::InvalidOptions { .. }));

        let err = monitor
            .register_check("db", ok, CheckOptions::new(Duration::from_secs(1), Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, HealthError::InvalidOptions { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_until_a_check_completes() {
        let monitor = HealthMonitor::new();
        assert_eq!(monitor.get_status().status, HealthStatus::Unhealthy);

        monitor.register_check("db", ok, every_second()).unwrap();
        let snapshot = monitor.get_status();
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert_eq!(snapshot.check("db").unwrap().healthy, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_failure_makes_monitor_unhealthy() {
        let monitor = HealthMonitor::new();
        monitor.register_check("cache", ok, every_second()).unwrap();
        monitor
            .register_check(
                "db",
                || async { Err::<(), _>("connection refused") },
                every_second().critical(true),
            )
            .unwrap();

        let snapshot = monitor.check_now().await;
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        let db = snapshot.check("db").unwrap();
        assert_eq!(db.healthy, Some(false));
        assert_eq!(db.message.as_deref(), Some("connection refused"));
        assert_eq!(snapshot.check("cache").unwrap().healthy, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_critical_failure_degrades() {
        let monitor = HealthMonitor::new();
        monitor
            .register_check("db", ok, every_second().critical(true))
            .unwrap();
        monitor
            .register_check("search", || async { Err::<(), _>("index stale") }, every_second())
            .unwrap();

        assert_eq!(monitor.check_now().await.status, HealthStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_panic_are_recorded() {
        let monitor = HealthMonitor::new();
        monitor
            .register_check(
                "slow",
                || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<(), BoxError>(())
                },
                every_second(),
            )
            .unwrap();
        monitor
            .register_check(
                "broken",
                || async {
                    if true {
                        panic!("probe exploded");
                    }
                    Ok::<(), BoxError>(())
                },
                every_second(),
            )
            .unwrap();
        monitor.register_check("fine", ok, every_second()).unwrap();

        let snapshot = monitor.check_now().await;
        let slow = snapshot.check("slow").unwrap();
        assert_eq!(slow.healthy, Some(false));
        assert!(slow.message.as_deref().unwrap().contains("timed out"));
        assert!(slow.duration_ms.unwrap() >= 100);

        let broken = snapshot.check("broken").unwrap();
        assert_eq!(broken.message.as_deref(), Some("check panicked: probe exploded"));
        assert_eq!(snapshot.check("fine").unwrap().healthy, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_runs_and_stop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let monitor = HealthMonitor::new();
        {
            let runs = runs.clone();
            monitor
                .register_check(
                    "counter",
                    move || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        async { Ok::<(), BoxError>(()) }
                    },
                    every_second(),
                )
                .unwrap();
        }

        monitor.start();
        monitor.start();
        assert!(monitor.is_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert_eq!(monitor.get_status().status, HealthStatus::Healthy);

        monitor.stop();
        assert!(!monitor.is_running());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_registered_after_start_is_scheduled() {
        let monitor = HealthMonitor::new();
        monitor.start();
        monitor.register_check("late", ok, every_second()).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(monitor.get_status().check("late").unwrap().healthy, Some(true));
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failures_reset_on_success() {
        let failing = Arc::new(AtomicBool::new(true));
        let monitor = HealthMonitor::new();
        {
            let failing = failing.clone();
            monitor
                .register_check(
                    "flaky",
                    move || {
                        let fail = failing.load(Ordering::SeqCst);
                        async move {
                            if fail {
                                Err::<(), _>("down")
                            } else {
                                Ok(())
                            }
                        }
                    },
                    every_second(),
                )
                .unwrap();
        }

        monitor.check_now().await;
        let snapshot = monitor.check_now().await;
        assert_eq!(snapshot.check("flaky").unwrap().consecutive_failures, 2);

        failing.store(false, Ordering::SeqCst);
        let snapshot = monitor.check_now().await;
        assert_eq!(snapshot.check("flaky").unwrap().consecutive_failures, 0);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_serializes() {
        let monitor = HealthMonitor::new();
        monitor.register_check("db", ok, every_second()).unwrap();
        let snapshot = monitor.check_now().await;

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["checks"][0]["name"], "db");
        assert_eq!(json["checks"][0]["healthy"], true);
    }
}
