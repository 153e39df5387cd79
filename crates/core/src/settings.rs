//! Conversion from file-level settings to validated runtime configs.
//!
//! Resilience sections convert through [`IntoRuntime`]. Monitoring and health
//! sections build their services directly through `from_settings`.

use std::sync::Arc;
use std::time::Duration;

use keelson_common::resilience::{
    BulkheadConfig, CircuitBreakerConfig, ConfigResult, RateLimit, RateLimiterConfig, RetryConfig,
};
use keelson_domain::{
    BulkheadSettings, CircuitBreakerSettings, HealthSettings, KeelsonError, MonitoringSettings,
    RateLimitSettings, RetrySettings,
};
use tracing::debug;

use crate::health::HealthCheckEngine;
use crate::monitoring::ports::Notifier;
use crate::monitoring::{default_rules, AlertEngine, MetricsStore};

/// Builds the runtime config a settings section describes.
pub trait IntoRuntime {
    type Runtime;

    /// # Errors
    /// Returns the builder's validation error for out-of-range values.
    fn to_runtime(&self) -> ConfigResult<Self::Runtime>;
}

impl IntoRuntime for RetrySettings {
    type Runtime = RetryConfig;

    fn to_runtime(&self) -> ConfigResult<RetryConfig> {
        RetryConfig::builder()
            .max_attempts(self.max_attempts)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_multiplier(self.backoff_multiplier)
            .jitter(self.jitter)
            .build()
    }
}

impl IntoRuntime for CircuitBreakerSettings {
    type Runtime = CircuitBreakerConfig;

    fn to_runtime(&self) -> ConfigResult<CircuitBreakerConfig> {
        CircuitBreakerConfig::builder()
            .failure_threshold(self.failure_threshold)
            .recovery_timeout(Duration::from_millis(self.recovery_timeout_ms))
            .required_half_open_successes(self.required_half_open_successes)
            .build()
    }
}

impl IntoRuntime for BulkheadSettings {
    type Runtime = BulkheadConfig;

    fn to_runtime(&self) -> ConfigResult<BulkheadConfig> {
        BulkheadConfig::builder()
            .max_concurrent(self.max_concurrent)
            .max_queue(self.max_queue)
            .timeout(Duration::from_millis(self.timeout_ms))
            .build()
    }
}

impl IntoRuntime for RateLimitSettings {
    type Runtime = RateLimiterConfig;

    fn to_runtime(&self) -> ConfigResult<RateLimiterConfig> {
        let default_limit = RateLimit {
            hourly_limit: self.default_hourly_limit,
            burst_limit: self.default_burst_limit,
        };
        let config = self.categories.iter().fold(
            RateLimiterConfig { default_limit, ..RateLimiterConfig::default() },
            |config, (category, limit)| {
                config.with_category(
                    category.clone(),
                    RateLimit { hourly_limit: limit.hourly_limit, burst_limit: limit.burst_limit },
                )
            },
        );
        config.validate()?;
        Ok(config)
    }
}

impl AlertEngine {
    /// Engine loaded with the built-in rules (when enabled) and then the
    /// configured `alert_rules`. A configured rule replaces a built-in one
    /// with the same id.
    pub fn from_settings(notifier: Arc<dyn Notifier>, settings: &MonitoringSettings) -> Self {
        let engine = Self::new(notifier);
        if settings.use_default_rules {
            for rule in default_rules() {
                engine.add_rule(rule);
            }
        }
        for rule in &settings.alert_rules {
            if engine.add_rule(rule.clone()) {
                debug!(rule_id = %rule.id, "Configured rule overrides built-in rule");
            }
        }
        engine
    }
}

impl MetricsStore {
    /// Store sized by `max_samples_per_endpoint`
    pub fn from_settings(alerts: Arc<AlertEngine>, settings: &MonitoringSettings) -> Self {
        Self::with_capacity(alerts, settings.max_samples_per_endpoint)
    }
}

impl HealthCheckEngine {
    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self::new(settings.version.clone())
            .with_timeout(Duration::from_millis(settings.timeout_ms.max(1)))
    }
}

/// Maps a config validation failure into the workspace error.
pub fn config_error(err: keelson_common::resilience::ConfigError) -> KeelsonError {
    KeelsonError::Config(err.to_string())
}
