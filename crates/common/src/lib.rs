//! Shared building blocks for the Keelson runtime.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: clock, error classification, collections, serde helpers
//! - `observability`: tracing instrumentation (pulled in by `runtime`)
//! - `runtime`: async resilience policies and test helpers

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod clock;
#[cfg(feature = "foundation")]
pub mod collections;
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use clock::{Clock, MockClock, SystemClock};
#[cfg(feature = "foundation")]
pub use collections::RingBuffer;
#[cfg(feature = "foundation")]
pub use error::{ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    retry, retry_with_policy, BoxedError, Bulkhead, BulkheadConfig, BulkheadStats, CircuitBreaker,
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, ClassifiedRetry, ConfigError,
    RateLimit, RateLimitStatus, RateLimiter, RateLimiterConfig, ResilienceError,
    ResilienceResult, RetryConfig, RetryDecision, RetryExecutor, RetryPolicy,
};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_millis;
