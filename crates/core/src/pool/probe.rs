//! Health probe backed by the pool manager

use std::sync::Arc;

use async_trait::async_trait;
use keelson_common::resilience::BoxedError;
use keelson_domain::PoolMonitorSettings;
use serde_json::json;

use super::manager::ResourcePoolManager;
use super::monitor::{evaluate_pools, PoolWarning};
use crate::health::ports::{HealthProbe, ProbeReport};

/// Reports pool capacity as a health check.
///
/// Unhealthy when any pool's state cannot be read, degraded when any pool
/// crosses a monitor threshold, healthy otherwise.
pub struct PoolHealthProbe {
    manager: Arc<ResourcePoolManager>,
    settings: PoolMonitorSettings,
}

impl PoolHealthProbe {
    pub fn new(manager: Arc<ResourcePoolManager>, settings: PoolMonitorSettings) -> Self {
        Self { manager, settings }
    }
}

#[async_trait]
impl HealthProbe for PoolHealthProbe {
    async fn check(&self) -> Result<ProbeReport, BoxedError> {
        let warnings = evaluate_pools(&self.manager, &self.settings);
        if let Some(PoolWarning::Unavailable { pool, error }) =
            warnings.iter().find(|w| matches!(w, PoolWarning::Unavailable { .. }))
        {
            return Err(format!("pool '{pool}' unavailable: {error}").into());
        }

        let report = if warnings.is_empty() { ProbeReport::healthy() } else { ProbeReport::degraded() };
        Ok(report.with_details(json!({
            "pools": self.manager.all_metrics(),
            "warnings": warnings,
        })))
    }
}
