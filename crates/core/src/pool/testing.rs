//! In-memory pool driver for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use keelson_domain::{PoolConfig, PoolState};
use parking_lot::Mutex;

use super::error::PoolError;
use super::manager::ResourcePoolManager;
use super::ports::{ConnectionPool, PoolDriver, PooledConnection, QueryResult, SqlValue};

/// Shared script and journal for every pool the mock driver opens
pub(crate) struct MockBackend {
    pub statements: Mutex<Vec<String>>,
    /// Statements starting with any of these prefixes fail
    pub failing: Mutex<Vec<String>>,
    /// `None` makes `state()` fail
    pub state: Mutex<Option<PoolState>>,
    pub fail_acquire: AtomicBool,
    pub closes: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            statements: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            state: Mutex::new(Some(PoolState {
                connections: 4,
                idle_connections: 2,
                waiting_clients: 0,
            })),
            fail_acquire: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        }
    }
}

impl MockBackend {
    pub fn fail_statements_starting_with(&self, prefix: &str) {
        self.failing.lock().push(prefix.to_string());
    }

    pub fn set_state(&self, state: Option<PoolState>) {
        *self.state.lock() = state;
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }
}

pub(crate) struct MockDriver {
    backend: Arc<MockBackend>,
}

struct MockPool {
    name: String,
    backend: Arc<MockBackend>,
}

struct MockConnection {
    backend: Arc<MockBackend>,
}

#[async_trait]
impl PoolDriver for MockDriver {
    async fn connect(
        &self,
        name: &str,
        config: &PoolConfig,
    ) -> Result<Arc<dyn ConnectionPool>, PoolError> {
        if config.url == "unreachable" {
            return Err(PoolError::Connect {
                pool: name.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(Arc::new(MockPool { name: name.to_string(), backend: Arc::clone(&self.backend) }))
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    async fn acquire(&self) -> Result<Box<dyn PooledConnection>, PoolError> {
        if self.backend.fail_acquire.load(Ordering::SeqCst) {
            return Err(PoolError::Acquire {
                pool: self.name.clone(),
                message: "timed out".to_string(),
            });
        }
        Ok(Box::new(MockConnection { backend: Arc::clone(&self.backend) }))
    }

    fn state(&self) -> Result<PoolState, PoolError> {
        (*self.backend.state.lock())
            .ok_or_else(|| PoolError::Query("state unavailable".to_string()))
    }

    async fn close(&self) {
        self.backend.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PooledConnection for MockConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, PoolError> {
        self.backend.statements.lock().push(sql.to_string());
        if self.backend.failing.lock().iter().any(|prefix| sql.starts_with(prefix.as_str())) {
            return Err(PoolError::Query(format!("failed: {sql}")));
        }
        let mut row = serde_json::Map::new();
        row.insert("params".to_string(), serde_json::json!(params.len()));
        Ok(QueryResult { rows_affected: 1, rows: vec![row] })
    }
}

/// Manager with pool `primary` open on a fresh mock backend.
pub(crate) async fn mock_manager() -> (Arc<ResourcePoolManager>, Arc<MockBackend>) {
    let backend = Arc::new(MockBackend::default());
    let manager =
        Arc::new(ResourcePoolManager::new(Arc::new(MockDriver { backend: Arc::clone(&backend) })));
    manager
        .add_pool("primary", PoolConfig::new("memory"))
        .await
        .expect("mock pool should open");
    (manager, backend)
}
