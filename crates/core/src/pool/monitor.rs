//! Periodic pool capacity checks

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keelson_domain::PoolMonitorSettings;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::manager::ResourcePoolManager;
use crate::scheduling::{PeriodicTask, SchedulerResult};

/// Capacity problem observed on one pool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolWarning {
    HighIdleRatio { pool: String, ratio: f64 },
    ManyWaitingClients { pool: String, waiting: u32 },
    SlowQueries { pool: String, average_ms: f64 },
    Unavailable { pool: String, error: String },
}

impl PoolWarning {
    pub fn pool(&self) -> &str {
        match self {
            Self::HighIdleRatio { pool, .. }
            | Self::ManyWaitingClients { pool, .. }
            | Self::SlowQueries { pool, .. }
            | Self::Unavailable { pool, .. } => pool,
        }
    }
}

impl fmt::Display for PoolWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighIdleRatio { pool, ratio } => {
                write!(f, "pool '{pool}' is {:.0}% idle", ratio * 100.0)
            }
            Self::ManyWaitingClients { pool, waiting } => {
                write!(f, "pool '{pool}' has {waiting} waiting clients")
            }
            Self::SlowQueries { pool, average_ms } => {
                write!(f, "pool '{pool}' averages {average_ms:.1}ms per query")
            }
            Self::Unavailable { pool, error } => write!(f, "pool '{pool}' unavailable: {error}"),
        }
    }
}

/// Checks every pool against the thresholds in `settings`.
pub fn evaluate_pools(
    manager: &ResourcePoolManager,
    settings: &PoolMonitorSettings,
) -> Vec<PoolWarning> {
    let mut warnings = Vec::new();
    for (pool, refreshed) in manager.refresh_all() {
        let metrics = match refreshed {
            Ok(metrics) => metrics,
            Err(err) => {
                warnings.push(PoolWarning::Unavailable { pool, error: err.to_string() });
                continue;
            }
        };

        let ratio = metrics.idle_ratio();
        if metrics.total_connections > 0 && ratio > settings.idle_ratio_warn {
            warnings.push(PoolWarning::HighIdleRatio { pool: pool.clone(), ratio });
        }
        if metrics.waiting_clients > settings.waiting_clients_warn {
            warnings.push(PoolWarning::ManyWaitingClients {
                pool: pool.clone(),
                waiting: metrics.waiting_clients,
            });
        }
        if metrics.average_query_time_ms > settings.slow_query_warn_ms {
            warnings.push(PoolWarning::SlowQueries {
                pool,
                average_ms: metrics.average_query_time_ms,
            });
        }
    }
    warnings
}

/// Background task logging pool warnings on an interval.
///
/// Stops on [`Self::stop`] or when the manager shuts down.
pub struct PoolMonitor {
    manager: Arc<ResourcePoolManager>,
    settings: PoolMonitorSettings,
    task: PeriodicTask,
}

impl PoolMonitor {
    pub fn new(manager: Arc<ResourcePoolManager>, settings: PoolMonitorSettings) -> Self {
        Self { manager, settings, task: PeriodicTask::new("pool_monitor") }
    }

    /// Runs one check, logging each warning.
    pub fn check_pools(&self) -> Vec<PoolWarning> {
        let warnings = evaluate_pools(&self.manager, &self.settings);
        for warning in &warnings {
            warn!(pool = warning.pool(), "{warning}");
        }
        debug!(warnings = warnings.len(), "Pool check complete");
        warnings
    }

    /// # Errors
    /// Returns `AlreadyRunning` if the monitor is running.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        let manager = Arc::clone(&self.manager);
        let settings = self.settings.clone();
        let interval = Duration::from_millis(self.settings.interval_ms.max(1));
        let parent = self.manager.shutdown_token().clone();

        self.task
            .start(interval, Some(&parent), move || {
                let manager = Arc::clone(&manager);
                let settings = settings.clone();
                async move {
                    for warning in evaluate_pools(&manager, &settings) {
                        warn!(pool = warning.pool(), "{warning}");
                    }
                }
            })
            .await?;
        info!(interval_ms = self.settings.interval_ms, "Pool monitor started");
        Ok(())
    }

    /// # Errors
    /// Returns `NotRunning` if the monitor is stopped.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        self.task.stop().await?;
        info!("Pool monitor stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}
