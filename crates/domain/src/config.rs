//! Configuration structures
//!
//! Every section deserializes with defaults, so a config file only needs the
//! keys it overrides. Durations are plain milliseconds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_HEALTH_TIMEOUT_MS, DEFAULT_IDLE_RATIO_WARN, DEFAULT_MAINTENANCE_INTERVAL_MS,
    DEFAULT_METRICS_RETENTION_MS, DEFAULT_POOL_MONITOR_INTERVAL_MS, DEFAULT_SLOW_QUERY_WARN_MS,
    DEFAULT_WAITING_CLIENTS_WARN, MAX_SAMPLES_PER_ENDPOINT,
};
use crate::types::AlertRule;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelsonConfig {
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub bulkhead: BulkheadSettings,
    pub rate_limits: RateLimitSettings,
    pub monitoring: MonitoringSettings,
    pub health: HealthSettings,
    pub pool_monitor: PoolMonitorSettings,
    pub maintenance: MaintenanceSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u64,
    pub recovery_timeout_ms: u64,
    pub required_half_open_successes: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout_ms: 60_000, required_half_open_successes: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadSettings {
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub timeout_ms: u64,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        Self { max_concurrent: 10, max_queue: 100, timeout_ms: 30_000 }
    }
}

/// Hourly and optional per-minute burst limit for one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLimit {
    pub hourly_limit: u32,
    #[serde(default)]
    pub burst_limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Applied to keys whose category has no entry in `categories`
    pub default_hourly_limit: u32,
    pub default_burst_limit: Option<u32>,
    pub categories: HashMap<String, CategoryLimit>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { default_hourly_limit: 1_000, default_burst_limit: None, categories: HashMap::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub max_samples_per_endpoint: usize,
    /// Install the built-in rule set before `alert_rules`
    pub use_default_rules: bool,
    pub alert_rules: Vec<AlertRule>,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            max_samples_per_endpoint: MAX_SAMPLES_PER_ENDPOINT,
            use_default_rules: true,
            alert_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Upper bound on a single probe run
    pub timeout_ms: u64,
    /// Reported in `SystemHealth::version`
    pub version: String,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self { timeout_ms: DEFAULT_HEALTH_TIMEOUT_MS, version: env!("CARGO_PKG_VERSION").to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolMonitorSettings {
    pub interval_ms: u64,
    pub idle_ratio_warn: f64,
    pub waiting_clients_warn: u32,
    pub slow_query_warn_ms: f64,
}

impl Default for PoolMonitorSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POOL_MONITOR_INTERVAL_MS,
            idle_ratio_warn: DEFAULT_IDLE_RATIO_WARN,
            waiting_clients_warn: DEFAULT_WAITING_CLIENTS_WARN,
            slow_query_warn_ms: DEFAULT_SLOW_QUERY_WARN_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub interval_ms: u64,
    /// Samples older than this are pruned on each run
    pub metrics_retention_ms: u64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_MAINTENANCE_INTERVAL_MS,
            metrics_retention_ms: DEFAULT_METRICS_RETENTION_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = crate::KeelsonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(crate::KeelsonError::Config(format!("Unknown log format: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: KeelsonConfig = toml::from_str(
            r#"
            [retry]
            max_attempts = 5

            [rate_limits.categories.reddit]
            hourly_limit = 600

            [logging]
            format = "json"
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000, "Unset keys keep defaults");
        assert_eq!(config.rate_limits.categories["reddit"].hourly_limit, 600);
        assert_eq!(config.rate_limits.categories["reddit"].burst_limit, None);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.circuit_breaker, CircuitBreakerSettings::default());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().expect("json"), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
