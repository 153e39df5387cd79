//! Named connection pools with scoped query and transaction helpers

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use keelson_domain::{PoolConfig, PoolMetrics};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::{PoolError, PoolResult};
use super::ports::{ConnectionPool, PoolDriver, PooledConnection, QueryResult, SqlValue};

struct ManagedPool {
    pool: Arc<dyn ConnectionPool>,
    metrics: Mutex<PoolMetrics>,
}

impl ManagedPool {
    /// Folds the driver's current occupancy into the metrics.
    fn refresh(&self) -> PoolResult<PoolMetrics> {
        let state = self.pool.state()?;
        let mut metrics = self.metrics.lock();
        metrics.apply_state(state);
        Ok(metrics.clone())
    }

    fn record_outcome<T>(&self, started: Instant, outcome: &PoolResult<T>) {
        let mut metrics = self.metrics.lock();
        match outcome {
            Ok(_) => metrics.record_query(started.elapsed().as_secs_f64() * 1000.0),
            Err(_) => metrics.record_error(),
        }
    }
}

/// Owns named pools opened through a [`PoolDriver`].
///
/// Every checkout is scoped: the connection is returned to its pool on all
/// exit paths of [`Self::query`] and [`Self::transaction`].
pub struct ResourcePoolManager {
    driver: Arc<dyn PoolDriver>,
    pools: RwLock<HashMap<String, Arc<ManagedPool>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ResourcePoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePoolManager")
            .field("pools", &self.pool_names())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl ResourcePoolManager {
    pub fn new(driver: Arc<dyn PoolDriver>) -> Self {
        Self { driver, pools: RwLock::new(HashMap::new()), shutdown: CancellationToken::new() }
    }

    /// Opens a pool and registers it under `name`.
    ///
    /// # Errors
    /// `AlreadyExists` for a duplicate name, `Closed` after shutdown, or the
    /// driver's connect error.
    #[instrument(skip(self, config))]
    pub async fn add_pool(&self, name: &str, config: PoolConfig) -> PoolResult<()> {
        self.ensure_open()?;
        if self.pools.read().contains_key(name) {
            return Err(PoolError::AlreadyExists(name.to_string()));
        }

        let pool = self.driver.connect(name, &config).await?;
        let inserted = match self.pools.write().entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(ManagedPool {
                    pool: Arc::clone(&pool),
                    metrics: Mutex::new(PoolMetrics::new(name)),
                }));
                true
            }
        };
        if !inserted {
            // Lost a race with a concurrent add of the same name
            pool.close().await;
            return Err(PoolError::AlreadyExists(name.to_string()));
        }

        info!(pool = name, max_size = config.max_size, "Pool added");
        Ok(())
    }

    pub fn get_pool(&self, name: &str) -> Option<Arc<dyn ConnectionPool>> {
        self.pools.read().get(name).map(|managed| Arc::clone(&managed.pool))
    }

    /// Unregisters and closes a pool.
    pub async fn remove_pool(&self, name: &str) -> PoolResult<()> {
        let managed =
            self.pools.write().remove(name).ok_or_else(|| PoolError::NotFound(name.to_string()))?;
        managed.pool.close().await;
        info!(pool = name, "Pool removed");
        Ok(())
    }

    /// Pool names, sorted
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Runs one statement on a checked-out connection.
    #[instrument(skip(self, params), fields(params = params.len()))]
    pub async fn query(
        &self,
        pool: &str,
        sql: &str,
        params: &[SqlValue],
    ) -> PoolResult<QueryResult> {
        let managed = self.managed(pool)?;
        let mut conn = Self::acquire(pool, &managed).await?;

        let started = Instant::now();
        let result = conn.execute(sql, params).await;
        drop(conn);

        if let Err(err) = &result {
            warn!(pool, error = %err, "Query failed");
        }
        managed.record_outcome(started, &result);
        result
    }

    /// Runs `body` inside `BEGIN`/`COMMIT` on one connection.
    ///
    /// A failure of `body` or of `COMMIT` issues `ROLLBACK` and returns
    /// [`PoolError::Transaction`] wrapping the original error.
    ///
    /// ```ignore
    /// manager.transaction("primary", |conn| Box::pin(async move {
    ///     conn.execute("UPDATE accounts SET balance = balance - 10 WHERE id = ?1", &[1.into()]).await?;
    ///     conn.execute("UPDATE accounts SET balance = balance + 10 WHERE id = ?1", &[2.into()]).await
    /// })).await?;
    /// ```
    #[instrument(skip(self, body))]
    pub async fn transaction<T, F>(&self, pool: &str, body: F) -> PoolResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut dyn PooledConnection) -> BoxFuture<'c, PoolResult<T>> + Send,
    {
        let managed = self.managed(pool)?;
        let mut conn = Self::acquire(pool, &managed).await?;
        let started = Instant::now();

        let outcome = match conn.execute("BEGIN", &[]).await {
            Err(err) => Err(err),
            Ok(_) => match body(conn.as_mut()).await {
                Ok(value) => match conn.execute("COMMIT", &[]).await {
                    Ok(_) => Ok(value),
                    Err(err) => Err(Self::rollback(pool, conn.as_mut(), err).await),
                },
                Err(err) => Err(Self::rollback(pool, conn.as_mut(), err).await),
            },
        };
        drop(conn);

        managed.record_outcome(started, &outcome);
        outcome
    }

    /// Current metrics for one pool, refreshed from the driver when possible.
    pub fn metrics(&self, name: &str) -> PoolResult<PoolMetrics> {
        let managed = self.managed(name)?;
        Ok(managed.refresh().unwrap_or_else(|err| {
            warn!(pool = name, error = %err, "Pool state unavailable, returning last metrics");
            managed.metrics.lock().clone()
        }))
    }

    /// Metrics for every pool, sorted by name
    pub fn all_metrics(&self) -> Vec<PoolMetrics> {
        self.pool_names().iter().filter_map(|name| self.metrics(name).ok()).collect()
    }

    /// Refreshes every pool, keeping per-pool state errors.
    pub fn refresh_all(&self) -> BTreeMap<String, PoolResult<PoolMetrics>> {
        let pools: Vec<(String, Arc<ManagedPool>)> = self
            .pools
            .read()
            .iter()
            .map(|(name, managed)| (name.clone(), Arc::clone(managed)))
            .collect();
        pools.into_iter().map(|(name, managed)| (name, managed.refresh())).collect()
    }

    /// Stops attached monitors and closes every pool. Idempotent.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let pools: Vec<(String, Arc<ManagedPool>)> = self.pools.write().drain().collect();
        for (name, managed) in pools {
            managed.pool.close().await;
            debug!(pool = %name, "Pool closed");
        }
        info!("Pool manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled by [`Self::shutdown`]; monitors derive child tokens.
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn ensure_open(&self) -> PoolResult<()> {
        if self.is_shut_down() {
            Err(PoolError::Closed("pool manager is shut down".to_string()))
        } else {
            Ok(())
        }
    }

    fn managed(&self, name: &str) -> PoolResult<Arc<ManagedPool>> {
        self.ensure_open()?;
        self.pools.read().get(name).cloned().ok_or_else(|| PoolError::NotFound(name.to_string()))
    }

    async fn acquire(pool: &str, managed: &ManagedPool) -> PoolResult<Box<dyn PooledConnection>> {
        managed.pool.acquire().await.map_err(|err| {
            warn!(pool, error = %err, "Connection acquire failed");
            managed.metrics.lock().record_error();
            err
        })
    }

    async fn rollback(pool: &str, conn: &mut dyn PooledConnection, cause: PoolError) -> PoolError {
        let rollback_error = match conn.execute("ROLLBACK", &[]).await {
            Ok(_) => None,
            Err(err) => {
                error!(pool, error = %err, "Rollback failed");
                Some(err.to_string())
            }
        };
        warn!(pool, error = %cause, "Transaction rolled back");
        PoolError::Transaction { source: Box::new(cause), rollback_error }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::pool::testing::mock_manager;

    /// Validates queries run on the named pool and feed its metrics
    #[tokio::test]
    async fn test_query_records_metrics() {
        let (manager, backend) = mock_manager().await;

        let result = manager
            .query("primary", "SELECT * FROM users WHERE id = ?1", &[7_i64.into()])
            .await
            .expect("query should succeed");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(backend.statements(), vec!["SELECT * FROM users WHERE id = ?1"]);

        let metrics = manager.metrics("primary").expect("pool exists");
        assert_eq!(metrics.total_queries, 1);
        assert_eq!(metrics.error_count, 0);
        assert_eq!(metrics.total_connections, 4, "State should be folded into metrics");
        assert_eq!(metrics.idle_connections, 2);
    }

    /// Validates a failing statement counts as an error, not a query
    #[tokio::test]
    async fn test_query_failure_counts_error() {
        let (manager, backend) = mock_manager().await;
        backend.fail_statements_starting_with("DELETE");

        let err = manager.query("primary", "DELETE FROM users", &[]).await.unwrap_err();
        assert!(matches!(err, PoolError::Query(_)));

        let metrics = manager.metrics("primary").unwrap();
        assert_eq!(metrics.total_queries, 0);
        assert_eq!(metrics.error_count, 1);
    }

    /// Validates acquire failures surface and are counted
    #[tokio::test]
    async fn test_acquire_failure() {
        let (manager, backend) = mock_manager().await;
        backend.fail_acquire.store(true, Ordering::SeqCst);

        let err = manager.query("primary", "SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, PoolError::Acquire { .. }));
        assert_eq!(manager.metrics("primary").unwrap().error_count, 1);
        assert!(backend.statements().is_empty(), "Nothing should execute without a connection");
    }

    /// Validates unknown pools and duplicate names are rejected
    #[tokio::test]
    async fn test_pool_registry() {
        let (manager, _backend) = mock_manager().await;

        let err = manager.query("missing", "SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, PoolError::NotFound(name) if name == "missing"));

        let err = manager.add_pool("primary", PoolConfig::new("memory")).await.unwrap_err();
        assert!(matches!(err, PoolError::AlreadyExists(_)));

        let err = manager.add_pool("replica", PoolConfig::new("unreachable")).await.unwrap_err();
        assert!(matches!(err, PoolError::Connect { .. }));
        assert_eq!(manager.pool_names(), vec!["primary"]);

        manager.add_pool("replica", PoolConfig::new("memory")).await.unwrap();
        assert_eq!(manager.pool_names(), vec!["primary", "replica"]);
        assert!(manager.get_pool("replica").is_some());

        manager.remove_pool("replica").await.unwrap();
        assert!(manager.get_pool("replica").is_none());
        assert!(matches!(manager.remove_pool("replica").await, Err(PoolError::NotFound(_))));
    }

    /// Validates a successful transaction is wrapped in BEGIN and COMMIT
    #[tokio::test]
    async fn test_transaction_commits() {
        let (manager, backend) = mock_manager().await;

        let affected = manager
            .transaction("primary", |conn| {
                Box::pin(async move {
                    let first = conn.execute("UPDATE a SET n = n - 1", &[]).await?;
                    let second = conn.execute("UPDATE b SET n = n + 1", &[]).await?;
                    Ok(first.rows_affected + second.rows_affected)
                })
            })
            .await
            .expect("transaction should commit");

        assert_eq!(affected, 2);
        assert_eq!(
            backend.statements(),
            vec!["BEGIN", "UPDATE a SET n = n - 1", "UPDATE b SET n = n + 1", "COMMIT"]
        );
        assert_eq!(manager.metrics("primary").unwrap().total_queries, 1);
    }

    /// Validates a failing body rolls back and keeps the original error
    #[tokio::test]
    async fn test_transaction_rolls_back() {
        let (manager, backend) = mock_manager().await;
        backend.fail_statements_starting_with("INSERT");

        let err = manager
            .transaction("primary", |conn| {
                Box::pin(async move { conn.execute("INSERT INTO t VALUES (1)", &[]).await })
            })
            .await
            .unwrap_err();

        match err {
            PoolError::Transaction { source, rollback_error } => {
                assert!(matches!(*source, PoolError::Query(_)));
                assert!(rollback_error.is_none(), "Rollback itself succeeded");
            }
            other => panic!("Expected Transaction error, got {other:?}"),
        }
        assert_eq!(backend.statements(), vec!["BEGIN", "INSERT INTO t VALUES (1)", "ROLLBACK"]);
        assert_eq!(manager.metrics("primary").unwrap().error_count, 1);
    }

    /// Validates a failed rollback is reported alongside the cause
    #[tokio::test]
    async fn test_transaction_rollback_failure() {
        let (manager, backend) = mock_manager().await;
        backend.fail_statements_starting_with("COMMIT");
        backend.fail_statements_starting_with("ROLLBACK");

        let err = manager
            .transaction("primary", |conn| Box::pin(async move { conn.execute("SELECT 1", &[]).await }))
            .await
            .unwrap_err();

        let PoolError::Transaction { rollback_error, .. } = err else {
            panic!("Expected Transaction error");
        };
        assert!(rollback_error.is_some_and(|msg| msg.contains("ROLLBACK")));
    }

    /// Validates stale metrics are returned when pool state is unreadable
    #[tokio::test]
    async fn test_metrics_survive_state_error() {
        let (manager, backend) = mock_manager().await;
        manager.query("primary", "SELECT 1", &[]).await.unwrap();
        backend.set_state(None);

        let metrics = manager.metrics("primary").expect("stale metrics are still served");
        assert_eq!(metrics.total_queries, 1);

        let refreshed = manager.refresh_all();
        assert!(refreshed["primary"].is_err(), "refresh_all keeps the state error");
    }

    /// Validates shutdown closes every pool and rejects further use
    #[tokio::test]
    async fn test_shutdown() {
        let (manager, backend) = mock_manager().await;
        manager.add_pool("replica", PoolConfig::new("memory")).await.unwrap();

        manager.shutdown().await;
        manager.shutdown().await;

        assert!(manager.is_shut_down());
        assert_eq!(backend.closes.load(Ordering::SeqCst), 2, "Each pool closes once");
        assert!(manager.pool_names().is_empty());
        assert!(matches!(
            manager.query("primary", "SELECT 1", &[]).await,
            Err(PoolError::Closed(_))
        ));
        assert!(matches!(
            manager.add_pool("late", PoolConfig::new("memory")).await,
            Err(PoolError::Closed(_))
        ));
    }
}
