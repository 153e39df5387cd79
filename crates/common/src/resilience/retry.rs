//! Bounded retry with exponential backoff.
//!
//! Attempt `n` that fails with a retryable error is followed by a pause of
//! `min(base_delay * backoff_multiplier^(n-1), max_delay)`, optionally scaled
//! by a random factor in `[0.5, 1.0]`. Pauses use `tokio::time::sleep`, so
//! the executor suspends cooperatively and honours paused test time.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use crate::error::ErrorClassification;
use crate::utils::serde::duration_millis;

/// Decision returned by a [`RetryPolicy`] after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the configured backoff
    Retry,
    /// Retry after the given delay (still capped at `max_delay`)
    RetryAfter(Duration),
    /// Give up and surface the error
    Stop,
}

/// Decides whether a failed attempt is worth repeating.
pub trait RetryPolicy<E>: Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Default policy: retry unless the error classifies itself as non-retryable.
///
/// Honours an error's [`ErrorClassification::retry_after`] hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifiedRetry;

impl<E: ErrorClassification> RetryPolicy<E> for ClassifiedRetry {
    fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Stop;
        }
        error.retry_after().map_or(RetryDecision::Retry, RetryDecision::RetryAfter)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay after the first failure
    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    pub base_delay: Duration,
    /// Upper bound on any single delay
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays (at least 1.0)
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.0]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid("backoff_multiplier must be a finite value >= 1.0"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid("max_delay must not be smaller than base_delay"));
        }
        Ok(())
    }

    /// Un-jittered delay after the given 1-based failed attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(capped as u64)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Set total attempts, including the first
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set the delay after the first failure
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Set the cap on any single delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Set the growth factor between consecutive delays
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    /// Scale each delay by a random factor in `[0.5, 1.0]`
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter = enabled;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Result of a retried execution together with attempt statistics.
#[derive(Debug)]
pub struct RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub result: ResilienceResult<T, E>,
    pub attempts: u32,
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn into_result(self) -> ResilienceResult<T, E> {
        self.result
    }
}

/// Runs an operation under a [`RetryConfig`] and [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor<P = ClassifiedRetry> {
    name: String,
    config: RetryConfig,
    policy: P,
}

impl RetryExecutor<ClassifiedRetry> {
    /// Executor using the classification-based default policy.
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self::with_policy(name, config, ClassifiedRetry)
    }
}

impl<P> RetryExecutor<P> {
    pub fn with_policy(name: impl Into<String>, config: RetryConfig, policy: P) -> Self {
        Self { name: name.into(), config, policy }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, the policy stops, or attempts run
    /// out. Failure is always [`ResilienceError::RetryExhausted`] carrying
    /// the last error.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        P: RetryPolicy<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_with_outcome(operation).await.into_result()
    }

    pub async fn execute_with_outcome<F, Fut, T, E>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut total_delay = Duration::ZERO;
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(name = %self.name, attempt, "Operation succeeded after retry");
                    }
                    return RetryOutcome { result: Ok(value), attempts: attempt, total_delay };
                }
                Err(error) => error,
            };

            let decision = if attempt >= max_attempts {
                RetryDecision::Stop
            } else {
                self.policy.should_retry(&error, attempt)
            };

            let delay = match decision {
                RetryDecision::Stop => {
                    warn!(
                        name = %self.name,
                        attempts = attempt,
                        error = %error,
                        "Giving up on operation"
                    );
                    return RetryOutcome {
                        result: Err(ResilienceError::RetryExhausted {
                            name: self.name.clone(),
                            attempts: attempt,
                            last_error: error,
                        }),
                        attempts: attempt,
                        total_delay,
                    };
                }
                RetryDecision::Retry => {
                    self.config.apply_jitter(self.config.backoff_delay(attempt))
                }
                RetryDecision::RetryAfter(custom) => custom.min(self.config.max_delay),
            };

            warn!(
                name = %self.name,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Operation failed, retrying"
            );

            tokio::time::sleep(delay).await;
            total_delay += delay;
            attempt += 1;
        }
    }
}

/// Retries `operation` with the default classification policy.
pub async fn retry<F, Fut, T, E>(
    name: &str,
    config: RetryConfig,
    operation: F,
) -> ResilienceResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    RetryExecutor::new(name, config).execute(operation).await
}

/// Retries `operation` with a caller-supplied policy.
pub async fn retry_with_policy<F, Fut, T, E, P>(
    name: &str,
    config: RetryConfig,
    policy: P,
    operation: F,
) -> ResilienceResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
    P: RetryPolicy<E>,
{
    RetryExecutor::with_policy(name, config, policy).execute(operation).await
}

/// Ready-made policies.
pub mod policies {
    use super::{RetryDecision, RetryPolicy};

    /// Retries every error.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retries.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries while a plain predicate over the error holds.
    #[derive(Debug, Clone, Copy)]
    pub struct PredicateRetry<E> {
        predicate: fn(&E) -> bool,
    }

    impl<E> PredicateRetry<E> {
        pub const fn new(predicate: fn(&E) -> bool) -> Self {
            Self { predicate }
        }
    }

    impl<E> RetryPolicy<E> for PredicateRetry<E> {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if (self.predicate)(error) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}
