//! Health check results and system-wide aggregation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Outcome of one probe run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub service: String,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(service: impl Into<String>) -> Self {
        Self::with_status(service, HealthStatus::Healthy)
    }

    pub fn degraded(service: impl Into<String>) -> Self {
        Self::with_status(service, HealthStatus::Degraded)
    }

    /// Unhealthy result carrying `error`
    pub fn unhealthy(service: impl Into<String>, error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), ..Self::with_status(service, HealthStatus::Unhealthy) }
    }

    fn with_status(service: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            service: service.into(),
            status,
            response_time_ms: 0,
            timestamp: Utc::now(),
            details: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Aggregated health across every registered probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall: HealthStatus,
    pub services: Vec<HealthCheckResult>,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub version: String,
}

impl SystemHealth {
    /// Builds the aggregate, deriving `overall` from `services`.
    pub fn from_results(
        services: Vec<HealthCheckResult>,
        uptime_secs: u64,
        version: impl Into<String>,
    ) -> Self {
        Self {
            overall: Self::derive_overall(&services),
            services,
            timestamp: Utc::now(),
            uptime_secs,
            version: version.into(),
        }
    }

    /// Worst status wins; an empty list is unhealthy.
    pub fn derive_overall(services: &[HealthCheckResult]) -> HealthStatus {
        if services.is_empty() || services.iter().any(|s| s.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if services.iter().any(|s| s.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
