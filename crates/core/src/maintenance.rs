//! Periodic pruning of metric samples and idle rate-limit windows

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use keelson_common::{Clock, RateLimiter, SystemClock};
use keelson_domain::MaintenanceSettings;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::monitoring::MetricsStore;
use crate::scheduling::{PeriodicTask, SchedulerResult};

/// What one maintenance pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub metrics_pruned: usize,
    pub rate_limit_keys_swept: usize,
}

trait StaleSweep: Send + Sync {
    fn sweep_stale(&self) -> usize;
}

impl<C: Clock> StaleSweep for RateLimiter<C> {
    fn sweep_stale(&self) -> usize {
        Self::sweep_stale(self)
    }
}

#[derive(Clone)]
struct Targets {
    store: Arc<MetricsStore>,
    limiter: Option<Arc<dyn StaleSweep>>,
    clock: Arc<dyn Clock>,
    retention: TimeDelta,
}

impl Targets {
    fn run(&self) -> MaintenanceReport {
        let now: DateTime<Utc> = self.clock.system_time().into();
        let metrics_pruned = now
            .checked_sub_signed(self.retention)
            .map_or(0, |cutoff| self.store.clear_metrics(Some(cutoff)));
        let rate_limit_keys_swept = self.limiter.as_ref().map_or(0, |l| l.sweep_stale());

        let report = MaintenanceReport { metrics_pruned, rate_limit_keys_swept };
        if report == MaintenanceReport::default() {
            debug!("Maintenance pass found nothing to prune");
        } else {
            info!(
                metrics_pruned = report.metrics_pruned,
                rate_limit_keys_swept = report.rate_limit_keys_swept,
                "Maintenance pass complete"
            );
        }
        report
    }
}

/// Prunes samples past retention and sweeps empty rate-limit windows.
pub struct MaintenanceScheduler {
    targets: Targets,
    interval: Duration,
    task: PeriodicTask,
}

impl MaintenanceScheduler {
    pub fn new(store: Arc<MetricsStore>, settings: &MaintenanceSettings) -> Self {
        let retention = i64::try_from(settings.metrics_retention_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .unwrap_or(TimeDelta::MAX);
        Self {
            targets: Targets { store, limiter: None, clock: Arc::new(SystemClock), retention },
            interval: Duration::from_millis(settings.interval_ms.max(1)),
            task: PeriodicTask::new("maintenance"),
        }
    }

    #[must_use]
    pub fn with_rate_limiter<C: Clock>(mut self, limiter: Arc<RateLimiter<C>>) -> Self {
        self.targets.limiter = Some(limiter);
        self
    }

    /// Clock used to compute the retention cutoff
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.targets.clock = clock;
        self
    }

    /// Runs one pass immediately.
    pub fn run_once(&self) -> MaintenanceReport {
        self.targets.run()
    }

    /// # Errors
    /// Returns `AlreadyRunning` if the scheduler is running.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        let targets = self.targets.clone();
        self.task
            .start(self.interval, None, move || {
                let targets = targets.clone();
                async move {
                    targets.run();
                }
            })
            .await?;
        info!(interval_ms = self.interval.as_millis(), "Maintenance scheduler started");
        Ok(())
    }

    /// # Errors
    /// Returns `NotRunning` if the scheduler is stopped.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        self.task.stop().await?;
        info!("Maintenance scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

#[cfg(test)]
mod tests {
    use keelson_common::{MockClock, RateLimit, RateLimiterConfig};
    use keelson_domain::MetricSample;

    use super::*;
    use crate::monitoring::{AlertEngine, ChannelNotifier};

    fn store() -> Arc<MetricsStore> {
        let (notifier, _rx) = ChannelNotifier::new();
        Arc::new(MetricsStore::new(Arc::new(AlertEngine::new(Arc::new(notifier)))))
    }

    fn settings(retention_ms: u64) -> MaintenanceSettings {
        MaintenanceSettings { interval_ms: 60_000, metrics_retention_ms: retention_ms }
    }

    /// Validates samples past retention are pruned and recent ones kept
    #[test]
    fn test_prunes_expired_samples() {
        let store = store();
        let now = Utc::now();
        store.record_metric(MetricSample::new("api", "/a", 10.0, 200).at(now - TimeDelta::hours(2)));
        store.record_metric(MetricSample::new("api", "/a", 12.0, 200).at(now));
        store.record_metric(MetricSample::new("api", "/b", 15.0, 200).at(now - TimeDelta::hours(3)));

        let scheduler = MaintenanceScheduler::new(Arc::clone(&store), &settings(3_600_000));
        let report = scheduler.run_once();

        assert_eq!(report.metrics_pruned, 2);
        assert_eq!(report.rate_limit_keys_swept, 0);
        assert_eq!(store.keys(), vec!["api:/a"], "Emptied keys are dropped");
    }

    /// Validates idle limiter keys are swept once their window expires
    #[test]
    fn test_sweeps_rate_limiter() {
        let clock = MockClock::new();
        let config = RateLimiterConfig::default().with_category("search", RateLimit::hourly(10));
        let limiter = Arc::new(RateLimiter::with_clock(config, clock.clone()).unwrap());
        limiter.record_request("search");
        limiter.record_request("other");

        let scheduler =
            MaintenanceScheduler::new(store(), &settings(3_600_000)).with_rate_limiter(Arc::clone(&limiter));
        assert_eq!(scheduler.run_once().rate_limit_keys_swept, 0, "Windows still active");

        clock.advance(Duration::from_secs(3_601));
        assert_eq!(scheduler.run_once().rate_limit_keys_swept, 2);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    /// Validates the retention cutoff follows the injected clock
    #[test]
    fn test_cutoff_uses_clock() {
        let store = store();
        store.record_metric(MetricSample::new("api", "/a", 10.0, 200));

        let clock = Arc::new(MockClock::new());
        let scheduler =
            MaintenanceScheduler::new(Arc::clone(&store), &settings(60_000)).with_clock(clock.clone());
        assert_eq!(scheduler.run_once().metrics_pruned, 0);

        clock.advance(Duration::from_secs(120));
        assert_eq!(scheduler.run_once().metrics_pruned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle() {
        let mut scheduler = MaintenanceScheduler::new(store(), &settings(3_600_000));
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(scheduler.start().await.is_err());

        tokio::time::sleep(Duration::from_secs(61)).await;
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
    }
}
