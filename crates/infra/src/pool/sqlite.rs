//! SQLite connection pools
//!
//! r2d2-based pooling over `rusqlite`. Every blocking call (pool build,
//! checkout, statement execution) runs on `tokio::task::spawn_blocking`.
//!
//! `PoolConfig::url` is a file path, or `:memory:` for a private in-memory
//! database per connection.
//!
//! A connection dropped inside an open transaction (its future cancelled
//! between `BEGIN` and `COMMIT`) is rolled back before r2d2 takes it back.

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keelson_core::pool::ports::{ConnectionPool, PoolDriver, PooledConnection, QueryResult, SqlValue};
use keelson_core::PoolError;
use keelson_domain::{PoolConfig, PoolState};
use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Value, ValueRef};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, instrument, warn};

const MEMORY_URL: &str = ":memory:";
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// Opens r2d2 pools of SQLite connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlitePoolDriver;

impl SqlitePoolDriver {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PoolDriver for SqlitePoolDriver {
    #[instrument(skip(self, config), fields(url = %config.url, max_size = config.max_size))]
    async fn connect(
        &self,
        name: &str,
        config: &PoolConfig,
    ) -> Result<Arc<dyn ConnectionPool>, PoolError> {
        let pool_name = name.to_string();
        let config = config.clone();
        let pool = tokio::task::spawn_blocking(move || SqlitePool::open(pool_name, &config))
            .await
            .map_err(|e| PoolError::Connect { pool: name.to_string(), message: e.to_string() })??;

        info!(pool = name, "SQLite pool opened");
        Ok(Arc::new(pool))
    }
}

struct SqlitePool {
    name: String,
    /// `None` once closed; dropping the r2d2 pool releases idle connections
    pool: Mutex<Option<Pool<SqliteConnectionManager>>>,
    waiting: Arc<AtomicU32>,
}

impl SqlitePool {
    fn open(name: String, config: &PoolConfig) -> Result<Self, PoolError> {
        let manager = if config.url == MEMORY_URL {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&config.url)
        }
        .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));

        let max_size = config.max_size.max(1);
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(config.min_idle.min(max_size)))
            .connection_timeout(Duration::from_millis(config.acquire_timeout_ms.max(1)))
            .build(manager)
            .map_err(|e| {
                warn!(pool = %name, error = %e, "Failed to create connection pool");
                PoolError::Connect { pool: name.clone(), message: e.to_string() }
            })?;

        Ok(Self { name, pool: Mutex::new(Some(pool)), waiting: Arc::new(AtomicU32::new(0)) })
    }

    fn open_pool(&self) -> Result<Pool<SqliteConnectionManager>, PoolError> {
        self.pool.lock().clone().ok_or_else(|| PoolError::Closed(self.name.clone()))
    }
}

/// Counts a caller as waiting until dropped
struct WaitGuard(Arc<AtomicU32>);

impl WaitGuard {
    fn enter(counter: &Arc<AtomicU32>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl ConnectionPool for SqlitePool {
    async fn acquire(&self) -> Result<Box<dyn PooledConnection>, PoolError> {
        let pool = self.open_pool()?;
        let acquire_error =
            |message: String| PoolError::Acquire { pool: self.name.clone(), message };
        let conn = {
            let _waiting = WaitGuard::enter(&self.waiting);
            tokio::task::spawn_blocking(move || pool.get())
                .await
                .map_err(|e| acquire_error(e.to_string()))?
                .map_err(|e| acquire_error(e.to_string()))?
        };

        Ok(Box::new(SqliteConnection { conn: Some(Checkout { conn, pool: self.name.clone() }) }))
    }

    fn state(&self) -> Result<PoolState, PoolError> {
        let state = self.open_pool()?.state();
        Ok(PoolState {
            connections: state.connections,
            idle_connections: state.idle_connections,
            waiting_clients: self.waiting.load(Ordering::Acquire),
        })
    }

    async fn close(&self) {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            let state = pool.state();
            drop(pool);
            debug!(
                pool = %self.name,
                idle_released = state.idle_connections,
                checked_out = state.connections - state.idle_connections,
                "SQLite pool closed"
            );
        }
    }
}

/// A checked-out connection that never returns to the pool mid-transaction.
struct Checkout {
    conn: r2d2::PooledConnection<SqliteConnectionManager>,
    pool: String,
}

impl Checkout {
    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

impl Deref for Checkout {
    type Target = rusqlite::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if self.in_transaction() {
            match self.conn.execute_batch("ROLLBACK") {
                Ok(()) => warn!(pool = %self.pool, "Rolled back abandoned transaction"),
                Err(e) => warn!(pool = %self.pool, error = %e, "Rollback of abandoned transaction failed"),
            }
        }
    }
}

struct SqliteConnection {
    /// Taken while a statement runs on the blocking pool
    conn: Option<Checkout>,
}

impl Drop for SqliteConnection {
    /// Moves an abandoned transaction's rollback onto the blocking pool.
    fn drop(&mut self) {
        let Some(checkout) = self.conn.take() else { return };
        if !checkout.in_transaction() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn_blocking(move || drop(checkout));
        }
    }
}

#[async_trait]
impl PooledConnection for SqliteConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, PoolError> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| PoolError::Query("connection lost by an earlier failure".to_string()))?;
        let sql = sql.to_string();
        let values: Vec<Value> = params.iter().map(to_sqlite).collect();

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = run_statement(&conn, &sql, &values);
            (conn, result)
        })
        .await
        .map_err(|e| PoolError::Query(format!("statement task failed: {e}")))?;

        self.conn = Some(conn);
        result
    }
}

fn run_statement(
    conn: &rusqlite::Connection,
    sql: &str,
    values: &[Value],
) -> Result<QueryResult, PoolError> {
    let query_error = |e: rusqlite::Error| PoolError::Query(e.to_string());
    let mut stmt = conn.prepare(sql).map_err(query_error)?;

    if stmt.column_count() == 0 {
        let affected = stmt.execute(rusqlite::params_from_iter(values)).map_err(query_error)?;
        return Ok(QueryResult {
            rows_affected: u64::try_from(affected).unwrap_or(u64::MAX),
            rows: Vec::new(),
        });
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(values)).map_err(query_error)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(query_error)? {
        let mut record = Map::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            record.insert(column.clone(), to_json(row.get_ref(index).map_err(query_error)?));
        }
        out.push(record);
    }
    Ok(QueryResult { rows_affected: 0, rows: out })
}

fn to_sqlite(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(f) => Value::Real(*f),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Blob(b) => Value::Blob(b.clone()),
    }
}

fn to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => JsonValue::from(bytes.to_vec()),
    }
}
