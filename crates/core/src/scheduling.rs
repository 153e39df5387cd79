//! Start/stop lifecycle shared by the periodic background tasks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keelson_domain::KeelsonError;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler is already running
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler not running")]
    NotRunning,

    /// Background task did not finish in time
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        duration: Duration,
        #[source]
        source: tokio::time::error::Elapsed,
    },

    /// Task join failed
    #[error("Task join failed: {0}")]
    TaskJoinFailed(#[from] tokio::task::JoinError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl From<SchedulerError> for KeelsonError {
    fn from(err: SchedulerError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns one background loop that runs `tick` every `interval` until stopped.
pub(crate) struct PeriodicTask {
    label: &'static str,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl PeriodicTask {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            label,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawns the loop. `parent`, when given, also stops it on cancellation.
    pub(crate) async fn start<F, Fut>(
        &mut self,
        interval: Duration,
        parent: Option<&CancellationToken>,
        mut tick: F,
    ) -> SchedulerResult<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        // Fresh token so the task can be restarted after stop
        self.cancellation_token = parent.map_or_else(CancellationToken::new, |p| p.child_token());
        let cancel = self.cancellation_token.clone();
        let label = self.label;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(task = label, "Periodic loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => tick().await,
                }
            }
        });

        *self.task_handle.lock().await = Some(handle);
        Ok(())
    }

    pub(crate) async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            tokio::time::timeout(JOIN_TIMEOUT, handle)
                .await
                .map_err(|source| SchedulerError::Timeout { duration: JOIN_TIMEOUT, source })??;
        }
        Ok(())
    }

    /// A task is running if it has a handle that hasn't finished.
    pub(crate) fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}
