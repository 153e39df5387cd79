//! Sliding-window rate limiting keyed by `category:tenant`.
//!
//! Each key keeps the ascending timestamps of its recorded requests. Every
//! access first drops timestamps older than the one-hour window, so the
//! retained sequence always describes the trailing hour. Limits are chosen
//! by the key's category (the part before the first `:`); unknown categories
//! use the default limit.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use crate::clock::{Clock, SystemClock};

/// Length of the main counting window.
pub const WINDOW: Duration = Duration::from_secs(60 * 60);

/// Length of the burst sub-window.
pub const BURST_WINDOW: Duration = Duration::from_secs(60);

/// Limits for one resource category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Requests allowed per trailing hour
    pub hourly_limit: u32,
    /// Requests allowed per trailing minute, when bursts are bounded
    #[serde(default)]
    pub burst_limit: Option<u32>,
}

impl RateLimit {
    pub const fn hourly(hourly_limit: u32) -> Self {
        Self { hourly_limit, burst_limit: None }
    }

    pub const fn with_burst(mut self, burst_limit: u32) -> Self {
        self.burst_limit = Some(burst_limit);
        self
    }
}

/// Per-category limits plus a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub default_limit: RateLimit,
    pub categories: HashMap<String, RateLimit>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { default_limit: RateLimit::hourly(1000), categories: HashMap::new() }
    }
}

impl RateLimiterConfig {
    pub fn with_category(mut self, category: impl Into<String>, limit: RateLimit) -> Self {
        self.categories.insert(category.into(), limit);
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let limits = std::iter::once(("default", &self.default_limit))
            .chain(self.categories.iter().map(|(name, limit)| (name.as_str(), limit)));
        for (name, limit) in limits {
            if limit.hourly_limit == 0 {
                return Err(ConfigError::invalid(format!(
                    "hourly_limit for '{name}' must be greater than 0"
                )));
            }
            if limit.burst_limit == Some(0) {
                return Err(ConfigError::invalid(format!(
                    "burst_limit for '{name}' must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

/// Answer to [`RateLimiter::check_limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining_requests: u32,
    /// When the oldest counted request leaves the window
    pub reset_time: SystemTime,
    /// Whole seconds to wait, set only when denied
    pub retry_after_secs: Option<u64>,
}

/// Sliding-window limiter over many keys.
#[derive(Debug)]
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimiterConfig,
    windows: DashMap<String, VecDeque<Instant>>,
    clock: C,
}

impl RateLimiter<SystemClock> {
    pub fn new(config: RateLimiterConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, windows: DashMap::new(), clock })
    }

    /// Limit applied to `key`, resolved from its category prefix.
    pub fn limit_for(&self, key: &str) -> RateLimit {
        key.split_once(':')
            .and_then(|(category, _)| self.config.categories.get(category))
            .copied()
            .unwrap_or(self.config.default_limit)
    }

    /// Reports whether another request for `key` fits, without recording it.
    pub fn check_limit(&self, key: &str) -> RateLimitStatus {
        let now = self.clock.now();
        let limit = self.limit_for(key);
        let mut window = self.windows.entry(key.to_string()).or_default();
        purge(&mut window, now);
        self.status(&window, limit, now)
    }

    /// Appends the current time to `key`'s window.
    pub fn record_request(&self, key: &str) {
        let now = self.clock.now();
        let mut window = self.windows.entry(key.to_string()).or_default();
        purge(&mut window, now);
        window.push_back(now);
    }

    /// Checks and records in one step.
    ///
    /// A denied request is not recorded and yields
    /// [`ResilienceError::RateLimitExceeded`].
    pub fn try_acquire<E>(&self, key: &str) -> ResilienceResult<RateLimitStatus, E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let now = self.clock.now();
        let limit = self.limit_for(key);
        let mut window = self.windows.entry(key.to_string()).or_default();
        purge(&mut window, now);
        let status = self.status(&window, limit, now);
        if !status.allowed {
            debug!(key, limit = limit.hourly_limit, "Rate limit exceeded");
            return Err(ResilienceError::RateLimitExceeded {
                key: key.to_string(),
                limit: limit.hourly_limit,
                retry_after_secs: status.retry_after_secs.unwrap_or(1),
            });
        }
        window.push_back(now);
        Ok(RateLimitStatus {
            remaining_requests: status.remaining_requests.saturating_sub(1),
            ..status
        })
    }

    /// Runs `operation` if `key` is within its limit, recording the request.
    pub async fn execute<F, Fut, T, E>(&self, key: &str, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.try_acquire::<E>(key)?;
        operation().await.map_err(ResilienceError::Operation)
    }

    /// Whether `key` is under its burst limit for the trailing minute.
    ///
    /// Always `true` for categories without a burst limit.
    pub fn can_use_burst(&self, key: &str) -> bool {
        let Some(burst_limit) = self.limit_for(key).burst_limit else {
            return true;
        };
        let now = self.clock.now();
        let mut window = self.windows.entry(key.to_string()).or_default();
        purge(&mut window, now);
        let recent = window
            .iter()
            .rev()
            .take_while(|at| now.saturating_duration_since(**at) < BURST_WINDOW)
            .count();
        recent < burst_limit as usize
    }

    /// Drops keys whose windows are empty after purging.
    ///
    /// Returns how many keys were removed.
    pub fn sweep_stale(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            purge(window, now);
            !window.is_empty()
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            info!(removed, "Swept stale rate-limit keys");
        }
        removed
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn status(&self, window: &VecDeque<Instant>, limit: RateLimit, now: Instant) -> RateLimitStatus {
        let count = u32::try_from(window.len()).unwrap_or(u32::MAX);
        let allowed = count < limit.hourly_limit;
        let until_reset = window
            .front()
            .map_or(Duration::ZERO, |oldest| (*oldest + WINDOW).saturating_duration_since(now));
        let retry_after_secs = (!allowed).then(|| ceil_secs(until_reset).max(1));

        RateLimitStatus {
            allowed,
            remaining_requests: limit.hourly_limit.saturating_sub(count),
            reset_time: self.clock.system_time() + until_reset,
            retry_after_secs,
        }
    }
}

fn purge(window: &mut VecDeque<Instant>, now: Instant) {
    while window.front().is_some_and(|oldest| now.saturating_duration_since(*oldest) >= WINDOW) {
        window.pop_front();
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
