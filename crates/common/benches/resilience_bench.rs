//! Resilience policy benchmarks
//!
//! Hot paths for breaker admission, backoff calculation, bulkhead admission
//! and rate-limit checks.
//!
//! Run with: `cargo bench --bench resilience_bench -p keelson-common
//! --features runtime`

use std::io;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keelson_common::resilience::{
    Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, MockClock, RateLimit,
    RateLimiter, RateLimiterConfig, ResilienceError, RetryConfig,
};
use tokio::runtime::Builder as RuntimeBuilder;

fn bench_circuit_breaker(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker");

    group.bench_function("call_success", |b| {
        let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default())
            .expect("valid breaker");
        b.iter(|| {
            let result: Result<_, ResilienceError<io::Error>> =
                breaker.call(|| Ok::<_, io::Error>(()));
            black_box(result).expect("success path");
        });
    });

    group.bench_function("call_rejected_open", |b| {
        let breaker = CircuitBreaker::with_clock(
            "bench",
            CircuitBreakerConfig::builder().failure_threshold(1).build().expect("config"),
            MockClock::new(),
        )
        .expect("valid breaker");
        let _ = breaker.call(|| Err::<(), _>(io::Error::other("trip")));
        b.iter(|| {
            let result: Result<(), ResilienceError<io::Error>> = breaker.call(|| Ok(()));
            black_box(result.is_err());
        });
    });

    group.finish();
}

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_backoff");
    let config = RetryConfig::builder().jitter(false).build().expect("config");

    for attempt in [1_u32, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(attempt), &attempt, |b, &attempt| {
            b.iter(|| black_box(config.backoff_delay(black_box(attempt))));
        });
    }

    group.finish();
}

fn bench_bulkhead(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread()
        .enable_time()
        .build()
        .expect("tokio runtime for benchmarks");
    let bulkhead = Bulkhead::new(
        "bench",
        BulkheadConfig::builder()
            .max_concurrent(8)
            .timeout(Duration::from_secs(1))
            .build()
            .expect("config"),
    )
    .expect("valid bulkhead");

    c.bench_function("bulkhead_execute_uncontended", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let result = bulkhead.execute(|| async { Ok::<_, io::Error>(1_u32) }).await;
                black_box(result).expect("admitted");
            });
        });
    });
}

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");

    for tracked in [10_u32, 1_000] {
        group.bench_with_input(BenchmarkId::new("check_limit", tracked), &tracked, |b, &tracked| {
            let limiter = RateLimiter::with_clock(
                RateLimiterConfig::default().with_category("api", RateLimit::hourly(u32::MAX)),
                MockClock::new(),
            )
            .expect("valid limiter");
            for _ in 0..tracked {
                limiter.record_request("api:tenant");
            }
            b.iter(|| black_box(limiter.check_limit("api:tenant")));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_circuit_breaker, bench_backoff, bench_bulkhead, bench_rate_limiter);
criterion_main!(benches);
