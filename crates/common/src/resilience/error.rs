//! Typed failures produced by resilience policies.

use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Boxed error used where the concrete type is erased (fallback producers).
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field failed validation
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Which constraint failed
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Result of configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can cross a policy boundary.
///
/// Generic over the wrapped operation's error `E`. Composed policies nest, so
/// a retry around a circuit breaker yields
/// `ResilienceError<ResilienceError<E>>`.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The circuit is open and the call was not attempted
    #[error("Circuit '{name}' is open after {failures} failures")]
    CircuitOpen {
        /// Protected resource name
        name: String,
        /// Failure count that opened the circuit
        failures: u64,
        /// When the most recent failure was recorded
        last_failure_time: Option<SystemTime>,
    },

    /// The bulkhead queue was full
    #[error("Bulkhead '{name}' rejected call: queue full ({queue_size}/{max_queue})")]
    BulkheadRejected {
        /// Bulkhead name
        name: String,
        /// Queue length at rejection time
        queue_size: usize,
        /// Configured queue bound
        max_queue: usize,
    },

    /// A queued call waited longer than the bulkhead timeout
    #[error("Bulkhead '{name}' queue wait exceeded {timeout:?}")]
    BulkheadTimeout {
        /// Bulkhead name
        name: String,
        /// Configured queue timeout
        timeout: Duration,
    },

    /// Every attempt failed, or the retry policy refused another attempt
    #[error("Retry '{name}' exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Operation name
        name: String,
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        #[source]
        last_error: E,
    },

    /// The feature is switched off and has no fallback
    #[error("Feature '{name}' is disabled")]
    FeatureDisabled {
        /// Feature name
        name: String,
    },

    /// The feature is switched off and its fallback failed
    #[error("Fallback for feature '{name}' failed: {source}")]
    FallbackFailed {
        /// Feature name
        name: String,
        /// Fallback error
        #[source]
        source: BoxedError,
    },

    /// The caller exceeded a rate limit
    #[error("Rate limit of {limit}/h exceeded for '{key}', retry after {retry_after_secs}s")]
    RateLimitExceeded {
        /// Rate-limit key (`category:tenant`)
        key: String,
        /// Hourly limit in force
        limit: u32,
        /// Seconds until a slot frees up
        retry_after_secs: u64,
    },

    /// The wrapped operation itself failed
    #[error(transparent)]
    Operation(E),
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// `true` for policy-generated errors, `false` for [`Self::Operation`].
    pub const fn is_operational(&self) -> bool {
        !matches!(self, Self::Operation(_))
    }

    /// The wrapped operation error, if this is one (or carries one).
    pub const fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(e) | Self::RetryExhausted { last_error: e, .. } => Some(e),
            _ => None,
        }
    }

    /// Consumes `self`, returning the operation error if present.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) | Self::RetryExhausted { last_error: e, .. } => Some(e),
            _ => None,
        }
    }

    /// Short, stable label for logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::BulkheadRejected { .. } => "bulkhead_rejected",
            Self::BulkheadTimeout { .. } => "bulkhead_timeout",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::FeatureDisabled { .. } => "feature_disabled",
            Self::FallbackFailed { .. } => "fallback_failed",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Operation(_) => "operation",
        }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. }
            | Self::BulkheadRejected { .. }
            | Self::BulkheadTimeout { .. }
            | Self::RateLimitExceeded { .. } => true,
            Self::RetryExhausted { .. } | Self::FeatureDisabled { .. } => false,
            Self::FallbackFailed { .. } => false,
            Self::Operation(e) => e.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen { .. } | Self::RetryExhausted { .. } | Self::FallbackFailed { .. } => {
                ErrorSeverity::Error
            }
            Self::BulkheadRejected { .. }
            | Self::BulkheadTimeout { .. }
            | Self::RateLimitExceeded { .. } => ErrorSeverity::Warning,
            Self::FeatureDisabled { .. } => ErrorSeverity::Info,
            Self::Operation(e) => e.severity(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after_secs, .. } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            Self::Operation(e) => e.retry_after(),
            _ => None,
        }
    }
}
