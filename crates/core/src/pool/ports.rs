//! Driver ports for pooled connections

use std::sync::Arc;

use async_trait::async_trait;
use keelson_domain::{PoolConfig, PoolState};
use serde::{Deserialize, Serialize};

use super::error::PoolError;

/// Statement parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Rows returned by a statement, each as a column-name map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows_affected: u64,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// A checked-out connection. Dropping it returns it to the pool.
#[async_trait]
pub trait PooledConnection: Send {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, PoolError>;
}

/// A live pool of connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Checks out a connection, waiting up to the pool's acquire timeout.
    async fn acquire(&self) -> Result<Box<dyn PooledConnection>, PoolError>;

    /// Current occupancy.
    fn state(&self) -> Result<PoolState, PoolError>;

    /// Stops handing out connections.
    async fn close(&self);
}

/// Opens pools for a particular backend.
#[async_trait]
pub trait PoolDriver: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        config: &PoolConfig,
    ) -> Result<Arc<dyn ConnectionPool>, PoolError>;
}
