//! Scripted operations for driving policies.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Error returned by scripted operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError {
    pub message: String,
    pub retryable: bool,
}

impl TestError {
    /// A transient failure the default retry policy will repeat.
    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    /// A permanent failure the default retry policy gives up on.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TestError {}

impl ErrorClassification for TestError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn severity(&self) -> ErrorSeverity {
        if self.retryable {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }
}

/// Operation that fails its first `failures` calls and succeeds afterwards.
///
/// Clones share the call counter.
#[derive(Debug, Clone)]
pub struct FlakyOperation {
    failures: u32,
    latency: Duration,
    error: TestError,
    calls: Arc<AtomicU32>,
}

impl FlakyOperation {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            latency: Duration::ZERO,
            error: TestError::transient("scripted failure"),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Operation that never succeeds.
    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    /// Sleeps for `latency` (tokio time) on every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Error returned on failing calls.
    #[must_use]
    pub fn with_error(mut self, error: TestError) -> Self {
        self.error = error;
        self
    }

    /// Runs one call, returning the 1-based call number on success.
    pub async fn call(&self) -> Result<u32, TestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if call <= self.failures {
            Err(self.error.clone())
        } else {
            Ok(call)
        }
    }

    /// Calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
