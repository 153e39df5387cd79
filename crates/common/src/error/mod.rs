//! Error classification shared by every policy.
//!
//! Policies never inspect concrete error types. They ask an error whether it
//! is worth retrying and how severe it is through [`ErrorClassification`].
//! The default retry policy retries everything except errors that report
//! `is_retryable() == false`, such as client-side 4xx equivalents.

use std::fmt;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Standard interface for classifying errors by their characteristics.
pub trait ErrorClassification {
    /// Whether a later attempt of the same operation could succeed.
    fn is_retryable(&self) -> bool;

    /// Severity used for logging and alerting decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Whether the error needs immediate attention.
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Suggested delay before the next attempt, when the error carries one.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Should be monitored but not critical
    Warning,
    /// Requires attention and action
    Error,
    /// Immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl ErrorClassification for io::Error {
    /// Retryable unless the kind says the request itself is wrong.
    fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            io::ErrorKind::InvalidInput
                | io::ErrorKind::InvalidData
                | io::ErrorKind::PermissionDenied
                | io::ErrorKind::NotFound
                | io::ErrorKind::AlreadyExists
                | io::ErrorKind::Unsupported
        )
    }

    fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            io::ErrorKind::InvalidData => ErrorSeverity::Critical,
            io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound => ErrorSeverity::Error,
            _ if self.is_retryable() => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}
