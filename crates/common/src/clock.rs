//! Time source abstraction.
//!
//! Every time-dependent policy (circuit breaker recovery, rate-limit windows,
//! alert cooldowns) reads time through [`Clock`] so tests can drive it with
//! [`MockClock`] instead of sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic instant, used for elapsed-time decisions.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for timestamps reported to callers.
    fn system_time(&self) -> SystemTime;

    /// Milliseconds since the UNIX epoch according to [`Clock::system_time`].
    fn millis_since_epoch(&self) -> u64 {
        let millis = self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same offset, so a clone handed to a policy observes every
/// `advance` made through the original.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    wall_start: SystemTime,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Creates a clock anchored at the current instant and wall time.
    pub fn new() -> Self {
        Self::at(SystemTime::now())
    }

    /// Creates a clock whose wall time starts at `wall_start`.
    pub fn at(wall_start: SystemTime) -> Self {
        Self { start: Instant::now(), wall_start, offset: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
    }

    /// Moves the clock forward by `millis` milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Sets the total offset from the starting point.
    pub fn set_elapsed(&self, elapsed: Duration) {
        *self.offset.lock() = elapsed;
    }

    /// Total offset applied so far.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.wall_start + self.elapsed()
    }
}
