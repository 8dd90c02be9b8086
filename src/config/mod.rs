//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ToolkitConfig (validated, immutable)
//!     → component `from_config` constructors
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; components copy the values they need
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, HealthConfig, KeyedRateLimitConfig, LogFormat, ObservabilityConfig,
    RateLimitConfig, RetryConfig, ToolkitConfig,
};
pub use validation::{validate_config, ValidationError};
