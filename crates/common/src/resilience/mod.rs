//! Composable policies for fallible remote operations.
//!
//! - **[`retry`]**: bounded retries with exponential backoff and jitter
//! - **[`circuit_breaker`]**: fail fast while a dependency is unhealthy
//! - **[`bulkhead`]**: bound concurrency with a FIFO wait queue
//! - **[`rate_limiter`]**: sliding-window request limits per key
//!
//! Every policy returns [`ResilienceError`], generic over the wrapped
//! operation's error. Policies nest freely:
//!
//! ```rust,no_run
//! use std::io;
//!
//! use keelson_common::resilience::{
//!     Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, RetryConfig,
//!     RetryExecutor,
//! };
//!
//! # async fn fetch() -> Result<String, io::Error> { Ok(String::new()) }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bulkhead = Bulkhead::new("search", BulkheadConfig::default())?;
//! let breaker = CircuitBreaker::new("search", CircuitBreakerConfig::default())?;
//! let retry = RetryExecutor::new("search", RetryConfig::default());
//!
//! let body = bulkhead
//!     .execute(|| breaker.execute(|| retry.execute(fetch)))
//!     .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod bulkhead;
pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;
pub mod retry;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadConfigBuilder, BulkheadRegistry, BulkheadStats};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitBreakerRegistry, CircuitBreakerSnapshot, CircuitState, ExpectedErrorFn,
};
pub use error::{BoxedError, ConfigError, ConfigResult, ResilienceError, ResilienceResult};
pub use rate_limiter::{RateLimit, RateLimitStatus, RateLimiter, RateLimiterConfig};
pub use retry::{
    policies, retry, retry_with_policy, ClassifiedRetry, RetryConfig, RetryConfigBuilder,
    RetryDecision, RetryExecutor, RetryOutcome, RetryPolicy,
};

pub use crate::clock::{Clock, MockClock, SystemClock};
