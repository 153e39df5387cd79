//! Concurrency isolation with a bounded FIFO wait queue.
//!
//! A bulkhead admits up to `max_concurrent` operations. Further callers wait
//! in a queue of at most `max_queue` entries for up to `timeout`; anything
//! beyond that is rejected immediately. When a running operation finishes,
//! its slot is handed directly to the oldest live waiter, so admission order
//! is strictly FIFO and `active` never exceeds `max_concurrent`.
//!
//! Cancellation is cooperative: dropping a queued call removes it from the
//! queue, but an operation that already started always runs to completion.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use crate::utils::serde::duration_millis;

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkheadConfig {
    /// Operations allowed to run at once
    pub max_concurrent: usize,
    /// Callers allowed to wait for a slot
    pub max_queue: usize,
    /// Longest a queued caller waits before failing
    #[serde(rename = "timeout_ms", with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 10, max_queue: 100, timeout: Duration::from_secs(30) }
    }
}

impl BulkheadConfig {
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be greater than 0"));
        }
        if self.timeout.is_zero() && self.max_queue > 0 {
            return Err(ConfigError::invalid("timeout must be positive when queueing is enabled"));
        }
        Ok(())
    }
}

/// Builder for [`BulkheadConfig`]
#[derive(Debug, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl BulkheadConfigBuilder {
    /// Set operations allowed to run at once
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    /// Set callers allowed to wait for a slot
    pub fn max_queue(mut self, max: usize) -> Self {
        self.config.max_queue = max;
        self
    }

    /// Set how long a queued caller waits
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> ConfigResult<BulkheadConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Diagnostics snapshot of a bulkhead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkheadStats {
    pub name: String,
    pub active: usize,
    pub queue_size: usize,
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub total_admitted: u64,
    pub total_rejected: u64,
    pub total_timed_out: u64,
}

impl BulkheadStats {
    /// Fraction of concurrency slots in use (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        self.active as f64 / self.max_concurrent.max(1) as f64
    }

    /// Fraction of calls that were rejected or timed out
    pub fn rejection_rate(&self) -> f64 {
        let failed = self.total_rejected + self.total_timed_out;
        let total = self.total_admitted + failed;
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }
}

struct Waiter {
    id: u64,
    enqueued_at: Instant,
    admit: oneshot::Sender<()>,
}

#[derive(Default)]
struct BulkheadState {
    active: usize,
    queue: VecDeque<Waiter>,
    next_id: u64,
}

impl BulkheadState {
    fn remove_waiter(&mut self, id: u64) -> bool {
        match self.queue.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Bounds concurrent in-flight operations for one named resource.
pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    state: Mutex<BulkheadState>,
    admitted: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bulkhead")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(name.into(), config))
    }

    fn from_validated(name: String, config: BulkheadConfig) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(BulkheadState::default()),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Runs `operation` once a slot is available.
    ///
    /// Fails with [`ResilienceError::BulkheadRejected`] when the queue is
    /// full, or [`ResilienceError::BulkheadTimeout`] when the wait exceeds the
    /// configured timeout. Operation errors come back as
    /// [`ResilienceError::Operation`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let _permit = self.acquire().await?;
        operation().await.map_err(ResilienceError::Operation)
    }

    async fn acquire<E>(&self) -> ResilienceResult<Permit<'_>, E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let (id, receiver) = {
            let mut state = self.state.lock();
            if state.active < self.config.max_concurrent {
                state.active += 1;
                self.admitted.fetch_add(1, Ordering::Relaxed);
                return Ok(Permit { bulkhead: self });
            }
            if state.queue.len() >= self.config.max_queue {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(name = %self.name, queue_size = state.queue.len(), "Bulkhead queue full");
                return Err(ResilienceError::BulkheadRejected {
                    name: self.name.clone(),
                    queue_size: state.queue.len(),
                    max_queue: self.config.max_queue,
                });
            }
            let id = state.next_id;
            state.next_id += 1;
            let (admit, receiver) = oneshot::channel();
            state.queue.push_back(Waiter { id, enqueued_at: Instant::now(), admit });
            (id, receiver)
        };

        let mut waiting = QueuedCall { bulkhead: self, id, receiver, armed: true };
        let admitted = tokio::time::timeout(self.config.timeout, &mut waiting.receiver).await;

        if matches!(admitted, Ok(Ok(()))) {
            waiting.armed = false;
            return Ok(Permit { bulkhead: self });
        }

        let mut state = self.state.lock();
        waiting.armed = false;
        if state.remove_waiter(id) {
            drop(state);
            self.timed_out.fetch_add(1, Ordering::Relaxed);
            warn!(
                name = %self.name,
                timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX),
                "Bulkhead queue wait timed out"
            );
            return Err(ResilienceError::BulkheadTimeout {
                name: self.name.clone(),
                timeout: self.config.timeout,
            });
        }
        // The slot was handed over between the timer firing and taking the lock.
        Ok(Permit { bulkhead: self })
    }

    /// Passes the caller's slot to the next live waiter, or frees it.
    fn release(&self) {
        let mut state = self.state.lock();
        self.release_locked(&mut state);
    }

    fn release_locked(&self, state: &mut BulkheadState) {
        while let Some(waiter) = state.queue.pop_front() {
            if waiter.admit.send(()).is_ok() {
                self.admitted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    name = %self.name,
                    waited_ms = u64::try_from(waiter.enqueued_at.elapsed().as_millis())
                        .unwrap_or(u64::MAX),
                    "Admitted queued call"
                );
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
    }

    pub fn stats(&self) -> BulkheadStats {
        let state = self.state.lock();
        BulkheadStats {
            name: self.name.clone(),
            active: state.active,
            queue_size: state.queue.len(),
            max_concurrent: self.config.max_concurrent,
            max_queue: self.config.max_queue,
            total_admitted: self.admitted.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            total_timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Occupied slot; releasing happens on drop so every exit path frees it.
struct Permit<'a> {
    bulkhead: &'a Bulkhead,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.bulkhead.release();
    }
}

/// A caller waiting in the queue. If dropped while armed (the caller was
/// cancelled), it leaves the queue or gives back a slot it was handed.
struct QueuedCall<'a> {
    bulkhead: &'a Bulkhead,
    id: u64,
    receiver: oneshot::Receiver<()>,
    armed: bool,
}

impl Drop for QueuedCall<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.bulkhead.state.lock();
        if !state.remove_waiter(self.id) {
            self.bulkhead.release_locked(&mut state);
        }
    }
}

/// Named bulkheads created on first use.
#[derive(Debug)]
pub struct BulkheadRegistry {
    bulkheads: DashMap<String, Arc<Bulkhead>>,
    default_config: BulkheadConfig,
}

impl BulkheadRegistry {
    pub fn new(default_config: BulkheadConfig) -> ConfigResult<Self> {
        default_config.validate()?;
        Ok(Self { bulkheads: DashMap::new(), default_config })
    }

    pub fn get_or_create(&self, name: &str) -> Arc<Bulkhead> {
        let entry = self.bulkheads.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Bulkhead::from_validated(name.to_string(), self.default_config.clone()))
        });
        Arc::clone(entry.value())
    }

    pub fn get_or_create_with(
        &self,
        name: &str,
        config: BulkheadConfig,
    ) -> ConfigResult<Arc<Bulkhead>> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }
        config.validate()?;
        let entry = self
            .bulkheads
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Bulkhead::from_validated(name.to_string(), config)));
        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Bulkhead>> {
        self.bulkheads.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Stats for every bulkhead, sorted by name.
    pub fn all_stats(&self) -> Vec<BulkheadStats> {
        let mut stats: Vec<_> = self.bulkheads.iter().map(|entry| entry.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
