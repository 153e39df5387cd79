//! Connection pool configuration and metrics

use serde::{Deserialize, Serialize};

/// Settings a driver uses to open a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Driver-specific connection target (file path, DSN)
    pub url: String,
    pub min_idle: u32,
    pub max_size: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { url: String::new(), min_idle: 1, max_size: 10, acquire_timeout_ms: 30_000 }
    }
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    #[must_use]
    pub const fn max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }
}

/// Instantaneous pool occupancy reported by the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
    pub waiting_clients: u32,
}

/// Per-pool counters maintained by the pool manager
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub name: String,
    pub total_connections: u32,
    pub idle_connections: u32,
    pub waiting_clients: u32,
    pub total_queries: u64,
    pub error_count: u64,
    pub average_query_time_ms: f64,
}

impl PoolMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Counts a completed query and folds `elapsed_ms` into the running mean.
    pub fn record_query(&mut self, elapsed_ms: f64) {
        self.total_queries += 1;
        // total_queries >= 1 here
        #[allow(clippy::cast_precision_loss)]
        let n = self.total_queries as f64;
        self.average_query_time_ms = (self.average_query_time_ms * (n - 1.0) + elapsed_ms) / n;
    }

    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    pub fn apply_state(&mut self, state: PoolState) {
        self.total_connections = state.connections;
        self.idle_connections = state.idle_connections;
        self.waiting_clients = state.waiting_clients;
    }

    /// Idle connections over total, 0 for an empty pool
    pub fn idle_ratio(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            f64::from(self.idle_connections) / f64::from(self.total_connections)
        }
    }
}
