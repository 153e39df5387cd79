//! Pool error types

use keelson_domain::KeelsonError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Pool not found: {0}")]
    NotFound(String),

    #[error("Pool already exists: {0}")]
    AlreadyExists(String),

    #[error("Failed to open pool '{pool}': {message}")]
    Connect { pool: String, message: String },

    #[error("Failed to acquire connection from pool '{pool}': {message}")]
    Acquire { pool: String, message: String },

    #[error("Query failed: {0}")]
    Query(String),

    /// The transaction body or commit failed and the transaction was rolled
    /// back. `rollback_error` is set when the rollback itself failed.
    #[error("Transaction failed: {source}")]
    Transaction {
        #[source]
        source: Box<PoolError>,
        rollback_error: Option<String>,
    },

    #[error("Pool closed: {0}")]
    Closed(String),
}

pub type PoolResult<T> = Result<T, PoolError>;

impl From<PoolError> for KeelsonError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NotFound(name) => Self::NotFound(format!("pool {name}")),
            other => Self::Pool(other.to_string()),
        }
    }
}
