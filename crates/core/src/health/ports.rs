//! Probe port consumed by the health check engine

use async_trait::async_trait;
use keelson_common::resilience::BoxedError;
use keelson_domain::HealthStatus;

/// What a probe observed. Timing and naming are filled in by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub status: HealthStatus,
    pub details: Option<serde_json::Value>,
}

impl ProbeReport {
    pub const fn healthy() -> Self {
        Self { status: HealthStatus::Healthy, details: None }
    }

    pub const fn degraded() -> Self {
        Self { status: HealthStatus::Degraded, details: None }
    }

    pub const fn unhealthy() -> Self {
        Self { status: HealthStatus::Unhealthy, details: None }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A named dependency check.
///
/// Returning `Err` marks the service unhealthy with the error's message.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<ProbeReport, BoxedError>;
}
