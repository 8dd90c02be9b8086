//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! monitor.rs:
//!     Per-check timer
//!     → Run check under its timeout
//!     → Store result (atomic swap)
//!
//! state.rs:
//!     Latest results at query time
//!     → Aggregate into Healthy / Degraded / Unhealthy
//! ```
//!
//! # Design Decisions
//! - Checks are independent; each has its own interval and timeout
//! - Snapshots are computed on demand, never cached
//! - Critical checks decide between Degraded and Unhealthy

pub mod monitor;
pub mod state;

pub use monitor::{CheckOptions, HealthMonitor};
pub use state::{CheckFailure, CheckReport, CheckResult, HealthSnapshot, HealthStatus};
