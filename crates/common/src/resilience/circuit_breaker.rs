//! Circuit breaker with closed, open and half-open states.
//!
//! Transitions:
//! - `Closed -> Open` when consecutive failures reach `failure_threshold`
//! - `Open -> HalfOpen` on the first call after `recovery_timeout` has elapsed
//!   since the last failure
//! - `HalfOpen -> Closed` after `required_half_open_successes` consecutive
//!   successes
//! - `HalfOpen -> Open` on any failure
//!
//! All counters for one breaker live behind a single lock, so concurrent
//! calls through a shared breaker observe a consistent state machine.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use crate::clock::{Clock, SystemClock};

/// Predicate marking errors that should not count toward the threshold.
pub type ExpectedErrorFn = fn(&(dyn std::error::Error + 'static)) -> bool;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow through
    Closed,
    /// Calls are rejected without being attempted
    Open,
    /// Calls flow through while recovery is being verified
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u64,
    /// Time the circuit stays open before a trial call is let through
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes needed to close the circuit
    pub required_half_open_successes: u64,
    /// Errors matching this predicate are neither successes nor failures
    pub expected_error: Option<ExpectedErrorFn>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            required_half_open_successes: 3,
            expected_error: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.required_half_open_successes == 0 {
            return Err(ConfigError::invalid(
                "required_half_open_successes must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Set consecutive failures that open the circuit
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open before a trial call
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Set half-open successes needed to close again
    pub fn required_half_open_successes(mut self, successes: u64) -> Self {
        self.config.required_half_open_successes = successes;
        self
    }

    /// Set the predicate for errors that count as neither success nor failure
    pub fn expected_error(mut self, predicate: ExpectedErrorFn) -> Self {
        self.config.expected_error = Some(predicate);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u64,
    /// Only meaningful while half-open
    pub success_count: u64,
    pub last_failure_time: Option<SystemTime>,
}

/// Lifetime call totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub ignored_errors: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    last_failure: Option<Instant>,
    last_failure_time: Option<SystemTime>,
}

impl BreakerState {
    const fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_time: None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    rejected: AtomicU64,
    ignored: AtomicU64,
}

/// Circuit breaker guarding one named resource.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    counters: Counters,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker using the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker reading time from `clock`
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(name.into(), config, clock))
    }

    fn from_validated(name: String, config: CircuitBreakerConfig, clock: C) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerState::closed()),
            counters: Counters::default(),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Runs `operation` unless the circuit is open.
    ///
    /// While open and before the recovery timeout, returns
    /// [`ResilienceError::CircuitOpen`] without invoking `operation`.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.try_acquire()?;
        let result = operation().await;
        self.record_result(result)
    }

    /// Synchronous counterpart of [`Self::execute`].
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.try_acquire()?;
        self.record_result(operation())
    }

    /// Admits or rejects a call, moving `Open -> HalfOpen` once recovery has
    /// elapsed.
    fn try_acquire<E>(&self) -> ResilienceResult<(), E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let recovered = inner.last_failure.map_or(true, |at| {
                self.clock.now().saturating_duration_since(at) >= self.config.recovery_timeout
            });
            if !recovered {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(name = %self.name, failures = inner.failure_count, "Circuit open, rejecting call");
                return Err(ResilienceError::CircuitOpen {
                    name: self.name.clone(),
                    failures: inner.failure_count,
                    last_failure_time: inner.last_failure_time,
                });
            }
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            info!(name = %self.name, "Circuit half-open, allowing trial call");
        }
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn record_result<T, E>(&self, result: Result<T, E>) -> ResilienceResult<T, E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                let expected = self
                    .config
                    .expected_error
                    .is_some_and(|matches| matches(&error as &(dyn std::error::Error + 'static)));
                if expected {
                    self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                    debug!(name = %self.name, error = %error, "Expected error, not counted");
                } else {
                    self.record_failure();
                }
                Err(ResilienceError::Operation(error))
            }
        }
    }

    /// Records a success observed outside [`Self::execute`].
    pub fn record_success(&self) {
        self.counters.success.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.required_half_open_successes {
                    let successes = inner.success_count;
                    *inner = BreakerState::closed();
                    info!(name = %self.name, successes, "Circuit closed");
                }
            }
            // A call admitted before another call opened the circuit
            CircuitState::Open => {}
        }
    }

    /// Records a failure observed outside [`Self::execute`].
    pub fn record_failure(&self) {
        self.counters.failure.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(self.clock.now());
        inner.last_failure_time = Some(self.clock.system_time());

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(name = %self.name, failures = inner.failure_count, "Circuit opened");
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                warn!(name = %self.name, "Circuit reopened after half-open failure");
            }
            _ => {}
        }
    }

    /// Current state, without triggering the open to half-open transition.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
        }
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.counters.total.load(Ordering::Relaxed),
            successful_calls: self.counters.success.load(Ordering::Relaxed),
            failed_calls: self.counters.failure.load(Ordering::Relaxed),
            rejected_calls: self.counters.rejected.load(Ordering::Relaxed),
            ignored_errors: self.counters.ignored.load(Ordering::Relaxed),
        }
    }

    /// Forces the breaker closed with zeroed counters.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
        info!(name = %self.name, "Circuit manually reset");
    }
}

/// Named breakers created on first use and kept for the process lifetime.
pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    default_config: CircuitBreakerConfig,
    clock: C,
}

impl CircuitBreakerRegistry<SystemClock> {
    pub fn new(default_config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(default_config, SystemClock)
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    pub fn with_clock(default_config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        default_config.validate()?;
        Ok(Self { breakers: DashMap::new(), default_config, clock })
    }

    /// Returns the breaker for `name`, creating it with the default config.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker<C>> {
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::from_validated(
                name.to_string(),
                self.default_config.clone(),
                self.clock.clone(),
            ))
        });
        Arc::clone(entry.value())
    }

    /// Returns the breaker for `name`, creating it with `config` if absent.
    ///
    /// An existing breaker keeps its original configuration.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<Arc<CircuitBreaker<C>>> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }
        config.validate()?;
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::from_validated(name.to_string(), config, self.clock.clone()))
        });
        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|entry| entry.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::clock::MockClock;

    fn breaker(clock: &MockClock) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .recovery_timeout(Duration::from_millis(60_000))
            .build()
            .expect("valid breaker config");
        CircuitBreaker::with_clock("payments", config, clock.clone()).expect("valid breaker")
    }

    fn fail(cb: &CircuitBreaker<MockClock>) -> ResilienceResult<(), io::Error> {
        cb.call(|| Err(io::Error::other("upstream down")))
    }

    fn succeed(cb: &CircuitBreaker<MockClock>) -> ResilienceResult<(), io::Error> {
        cb.call(|| Ok(()))
    }

    /// Validates display strings and config validation.
    #[test]
    fn test_state_display_and_config_validation() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().required_half_open_successes(0).build().is_err());
        assert_eq!(CircuitBreakerConfig::default().required_half_open_successes, 3);
    }

    /// Validates the full closed, open, half-open, closed lifecycle.
    #[tokio::test]
    async fn test_lifecycle_open_half_open_closed() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        let invocations = AtomicU32::new(0);

        for _ in 0..3 {
            let result: ResilienceResult<(), io::Error> = cb
                .execute(|| async {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err(io::Error::other("upstream down"))
                })
                .await;
            assert!(matches!(result, Err(ResilienceError::Operation(_))));
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected: ResilienceResult<(), io::Error> = cb
            .execute(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        match rejected {
            Err(ResilienceError::CircuitOpen { name, failures, last_failure_time }) => {
                assert_eq!(name, "payments");
                assert_eq!(failures, 3);
                assert!(last_failure_time.is_some());
            }
            other => panic!("Expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 3, "Open circuit must not invoke operation");

        clock.advance(Duration::from_millis(60_000));
        assert!(succeed(&cb).is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(succeed(&cb).is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(succeed(&cb).is_ok());

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 0);
    }

    /// Validates that one half-open failure reopens the circuit.
    #[test]
    fn test_half_open_failure_reopens() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        for _ in 0..3 {
            let _ = fail(&cb);
        }

        clock.advance(Duration::from_secs(61));
        assert!(succeed(&cb).is_ok());
        assert_eq!(cb.snapshot().success_count, 1);

        assert!(fail(&cb).is_err());
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.success_count, 0);
        assert!(matches!(succeed(&cb), Err(ResilienceError::CircuitOpen { .. })));
    }

    /// Validates that the circuit stays open before the recovery timeout.
    #[test]
    fn test_open_until_recovery_timeout() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        for _ in 0..3 {
            let _ = fail(&cb);
        }

        clock.advance(Duration::from_millis(59_999));
        assert!(matches!(succeed(&cb), Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(cb.metrics().rejected_calls, 1);
    }

    /// Validates that a success in the closed state resets the failure count.
    #[test]
    fn test_closed_success_resets_failures() {
        let clock = MockClock::new();
        let cb = breaker(&clock);

        let _ = fail(&cb);
        let _ = fail(&cb);
        assert!(succeed(&cb).is_ok());
        let _ = fail(&cb);
        let _ = fail(&cb);

        assert_eq!(cb.state(), CircuitState::Closed, "Failures must be consecutive");
        assert_eq!(cb.snapshot().failure_count, 2);
    }

    /// Validates that expected errors propagate but are not counted.
    #[test]
    fn test_expected_errors_do_not_trip() {
        fn is_not_found(error: &(dyn std::error::Error + 'static)) -> bool {
            error
                .downcast_ref::<io::Error>()
                .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
        }

        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .expected_error(is_not_found)
            .build()
            .expect("valid config");
        let cb = CircuitBreaker::with_clock("lookup", config, MockClock::new()).expect("breaker");

        for _ in 0..5 {
            let result: ResilienceResult<(), io::Error> =
                cb.call(|| Err(io::Error::from(io::ErrorKind::NotFound)));
            assert!(matches!(result, Err(ResilienceError::Operation(_))));
        }

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().ignored_errors, 5);
    }

    /// Validates manual reset from the open state.
    #[test]
    fn test_reset_closes_circuit() {
        let clock = MockClock::new();
        let cb = breaker(&clock);
        for _ in 0..3 {
            let _ = fail(&cb);
        }

        cb.reset();

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.last_failure_time, None);
    }

    /// Validates that the registry hands out one shared breaker per name.
    #[test]
    fn test_registry_shares_breakers() {
        let registry =
            CircuitBreakerRegistry::with_clock(CircuitBreakerConfig::default(), MockClock::new())
                .expect("registry");

        let first = registry.get_or_create("search");
        let second = registry.get_or_create("search");
        first.record_failure();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.snapshot().failure_count, 1);

        let custom = CircuitBreakerConfig::builder().failure_threshold(1).build().expect("config");
        let other = registry.get_or_create_with("billing", custom).expect("breaker");
        other.record_failure();
        assert_eq!(other.state(), CircuitState::Open);

        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["billing".to_string(), "search".to_string()]);

        registry.reset_all();
        assert_eq!(other.state(), CircuitState::Closed);
    }
}
