//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Caller
//!     → bucket.rs (refill from elapsed time, then deduct or wait)
//!     → keyed.rs (one bucket per key, created on first use)
//!     → Idle sweep drops buckets unused for longer than the TTL
//! ```
//!
//! # Design Decisions
//! - Continuous refill at capacity / window; no window-boundary bursts
//! - Refill and deduction share one lock per bucket
//! - A failed or cancelled acquisition deducts nothing
//! - Keys never share state; no cross-key fairness

pub mod bucket;
pub mod keyed;

pub use bucket::RateLimiter;
pub use keyed::KeyedRateLimiter;
