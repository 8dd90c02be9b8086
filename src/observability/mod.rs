//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, limiters, retries, health checks produce:
//!     → tracing events (structured fields: breaker, limiter, check, attempt)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (pretty or JSON)
//!     → whatever `metrics` exporter the host installs
//! ```
//!
//! # Design Decisions
//! - The library never installs an exporter or opens a socket
//! - Logging init is optional; hosts with their own subscriber skip it

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LoggingError};

use crate::config::ObservabilityConfig;

/// Apply the observability section: metrics switch, then the log subscriber.
pub fn init(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    metrics::configure(config);
    init_logging(config)
}
