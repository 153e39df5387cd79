//! Domain constants
//!
//! Defaults shared by the monitoring, health and pool components.

// Metrics retention
pub const MAX_SAMPLES_PER_ENDPOINT: usize = 1000;
pub const DEFAULT_METRICS_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

// Health checks
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 5_000;
pub const HEALTH_NOT_FOUND: &str = "not found";
pub const HEALTH_TIMED_OUT: &str = "timed out";

// Alerting
pub const DEFAULT_ALERT_COOLDOWN_MINUTES: u32 = 5;
pub const ERROR_STATUS_THRESHOLD: u16 = 400;

// Pool monitoring
pub const DEFAULT_POOL_MONITOR_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_IDLE_RATIO_WARN: f64 = 0.8;
pub const DEFAULT_WAITING_CLIENTS_WARN: u32 = 5;
pub const DEFAULT_SLOW_QUERY_WARN_MS: f64 = 1_000.0;

// Maintenance
pub const DEFAULT_MAINTENANCE_INTERVAL_MS: u64 = 60 * 60 * 1000;
