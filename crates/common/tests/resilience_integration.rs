//! Integration tests for composed resilience policies
//!
//! Exercises policies stacked the way request handlers use them:
//! bulkhead around circuit breaker around retry.

#![cfg(feature = "runtime")]

use std::sync::Arc;
use std::time::Duration;

use keelson_common::resilience::{
    policies, Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    RateLimit, RateLimiter, RateLimiterConfig, ResilienceError, RetryConfig, RetryExecutor,
};
use keelson_common::testing::{FlakyOperation, MockClock, TestError};

fn quick_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::builder()
        .max_attempts(max_attempts)
        .base_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(100))
        .jitter(false)
        .build()
        .expect("valid retry config")
}

/// Validates that retries inside a breaker absorb transient failures without
/// tripping it.
///
/// # Test Steps
/// 1. Wrap a retrying call (2 transient failures) in a breaker with threshold 1
/// 2. Verify the call succeeds on the third attempt
/// 3. Verify the breaker stayed closed
#[tokio::test(start_paused = true)]
async fn test_retry_inside_breaker_absorbs_transient_failures() {
    let breaker = CircuitBreaker::with_clock(
        "inventory",
        CircuitBreakerConfig::builder().failure_threshold(1).build().expect("config"),
        MockClock::new(),
    )
    .expect("breaker");
    let retry = RetryExecutor::new("inventory", quick_retry(3));
    let op = FlakyOperation::new(2);

    let result = breaker.execute(|| retry.execute(|| op.call())).await;

    assert_eq!(result.ok(), Some(3));
    assert_eq!(op.calls(), 3);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates that a breaker inside a retry stops retrying once open.
///
/// # Test Steps
/// 1. Retry (5 attempts) around a breaker with threshold 2
/// 2. The operation always fails
/// 3. Verify the operation ran only twice and the breaker is open
/// 4. Verify the final error is the open circuit, not the operation error
#[tokio::test(start_paused = true)]
async fn test_breaker_inside_retry_fails_fast_once_open() {
    let clock = MockClock::new();
    let breaker = CircuitBreaker::with_clock(
        "ledger",
        CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .recovery_timeout(Duration::from_secs(60))
            .build()
            .expect("config"),
        clock,
    )
    .expect("breaker");
    let retry = RetryExecutor::with_policy("ledger", quick_retry(5), policies::AlwaysRetry);
    let op = FlakyOperation::always_failing();

    let result = retry.execute(|| breaker.execute(|| op.call())).await;

    assert_eq!(op.calls(), 2, "Open circuit must stop invoking the operation");
    assert_eq!(breaker.state(), CircuitState::Open);
    match result {
        Err(ResilienceError::RetryExhausted { attempts, last_error, .. }) => {
            assert_eq!(attempts, 5);
            assert!(matches!(last_error, ResilienceError::CircuitOpen { failures: 2, .. }));
        }
        other => panic!("Expected RetryExhausted, got {other:?}"),
    }
}

/// Validates that permanent errors skip retries and pass through the stack.
#[tokio::test(start_paused = true)]
async fn test_permanent_error_passes_through_stack() {
    let bulkhead = Bulkhead::new("profile", BulkheadConfig::default()).expect("bulkhead");
    let retry = RetryExecutor::new("profile", quick_retry(4));
    let op = FlakyOperation::always_failing().with_error(TestError::permanent("404"));

    let result = bulkhead.execute(|| retry.execute(|| op.call())).await;

    assert_eq!(op.calls(), 1);
    let exhausted = match result {
        Err(ResilienceError::Operation(inner)) => inner,
        other => panic!("Expected operation error from bulkhead, got {other:?}"),
    };
    assert_eq!(exhausted.operation_error().map(|e| e.message.as_str()), Some("404"));
}

/// Validates bulkhead isolation across concurrently spawned tasks.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bulkhead_bounds_spawned_tasks() {
    let bulkhead = Arc::new(
        Bulkhead::new(
            "reports",
            BulkheadConfig::builder()
                .max_concurrent(3)
                .max_queue(20)
                .timeout(Duration::from_secs(5))
                .build()
                .expect("config"),
        )
        .expect("bulkhead"),
    );
    let op = FlakyOperation::new(0).with_latency(Duration::from_millis(20));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let bulkhead = Arc::clone(&bulkhead);
            let op = op.clone();
            tokio::spawn(async move {
                bulkhead
                    .execute(|| async {
                        let active = bulkhead.stats().active;
                        assert!(active <= 3, "Active count {active} exceeded limit");
                        op.call().await
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        let result = handle.await.expect("task should not panic");
        assert!(result.is_ok());
    }
    assert_eq!(op.calls(), 12);
    assert_eq!(bulkhead.stats().active, 0);
}

/// Validates that rate limiting rejects before any other policy runs.
#[tokio::test]
async fn test_rate_limiter_gates_operation() {
    let clock = MockClock::new();
    let limiter = RateLimiter::with_clock(
        RateLimiterConfig::default().with_category("reddit", RateLimit::hourly(2)),
        clock.clone(),
    )
    .expect("limiter");
    let op = FlakyOperation::new(0);

    for _ in 0..2 {
        assert!(limiter.execute("reddit:tenantA", || op.call()).await.is_ok());
    }
    let limited = limiter.execute("reddit:tenantA", || op.call()).await;

    assert!(matches!(limited, Err(ResilienceError::RateLimitExceeded { limit: 2, .. })));
    assert_eq!(op.calls(), 2);

    clock.advance(Duration::from_secs(3600));
    assert!(limiter.execute("reddit:tenantA", || op.call()).await.is_ok());
}
