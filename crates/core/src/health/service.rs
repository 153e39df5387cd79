//! Health check engine

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use keelson_common::resilience::BoxedError;
use keelson_domain::constants::{DEFAULT_HEALTH_TIMEOUT_MS, HEALTH_NOT_FOUND, HEALTH_TIMED_OUT};
use keelson_domain::{HealthCheckResult, HealthStatus, SystemHealth};
use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use super::ports::{HealthProbe, ProbeReport};

/// Runs registered probes and aggregates their results.
///
/// Probe failures, timeouts and unknown names are reported as unhealthy
/// results; no method on the engine fails.
pub struct HealthCheckEngine {
    probes: RwLock<BTreeMap<String, Arc<dyn HealthProbe>>>,
    timeout: Duration,
    version: String,
    started: Instant,
}

impl std::fmt::Debug for HealthCheckEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckEngine")
            .field("probes", &self.names())
            .field("timeout", &self.timeout)
            .field("version", &self.version)
            .finish()
    }
}

impl HealthCheckEngine {
    /// Create an engine reporting `version`, with the default probe timeout
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            probes: RwLock::new(BTreeMap::new()),
            timeout: Duration::from_millis(DEFAULT_HEALTH_TIMEOUT_MS),
            version: version.into(),
            started: Instant::now(),
        }
    }

    /// Bound each probe run by `timeout`
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers `probe` under `name`, replacing any previous probe.
    pub fn register_health_check(&self, name: impl Into<String>, probe: Arc<dyn HealthProbe>) {
        let name = name.into();
        debug!(name = %name, "Registering health check");
        self.probes.write().insert(name, probe);
    }

    /// Registers an async closure as a probe.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ProbeReport, BoxedError>> + Send + 'static,
    {
        self.register_health_check(name, Arc::new(FnProbe(check)));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.probes.write().remove(name).is_some()
    }

    /// Registered probe names, sorted
    pub fn names(&self) -> Vec<String> {
        self.probes.read().keys().cloned().collect()
    }

    /// Time since the engine was created
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Runs one probe and reports its outcome.
    #[instrument(skip(self))]
    pub async fn run_health_check(&self, name: &str) -> HealthCheckResult {
        let probe = self.probes.read().get(name).cloned();
        match probe {
            Some(probe) => self.run_probe(name, probe).await,
            None => HealthCheckResult::unhealthy(name, HEALTH_NOT_FOUND),
        }
    }

    /// Runs every probe concurrently and aggregates the results.
    ///
    /// Results are ordered by service name.
    #[instrument(skip(self))]
    pub async fn run_all_health_checks(&self) -> SystemHealth {
        let probes: Vec<(String, Arc<dyn HealthProbe>)> = self
            .probes
            .read()
            .iter()
            .map(|(name, probe)| (name.clone(), Arc::clone(probe)))
            .collect();

        let results =
            join_all(probes.into_iter().map(|(name, probe)| async move {
                self.run_probe(&name, probe).await
            }))
            .await;

        let health = SystemHealth::from_results(results, self.uptime().as_secs(), &self.version);
        debug!(
            overall = health.overall.as_str(),
            services = health.services.len(),
            "Health checks complete"
        );
        health
    }

    async fn run_probe(&self, name: &str, probe: Arc<dyn HealthProbe>) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, probe.check()).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut result = match outcome {
            Ok(Ok(report)) => {
                let mut result = match report.status {
                    HealthStatus::Healthy => HealthCheckResult::healthy(name),
                    HealthStatus::Degraded => HealthCheckResult::degraded(name),
                    HealthStatus::Unhealthy => {
                        HealthCheckResult::unhealthy(name, "probe reported unhealthy")
                    }
                };
                result.details = report.details;
                result
            }
            Ok(Err(err)) => {
                warn!(name, error = %err, "Health check failed");
                HealthCheckResult::unhealthy(name, err.to_string())
            }
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(name, timeout_ms, "Health check timed out");
                HealthCheckResult::unhealthy(name, HEALTH_TIMED_OUT)
            }
        };
        result.response_time_ms = elapsed_ms;
        result
    }
}

struct FnProbe<F>(F);

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProbeReport, BoxedError>> + Send + 'static,
{
    async fn check(&self) -> Result<ProbeReport, BoxedError> {
        (self.0)().await
    }
}
