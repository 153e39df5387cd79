//! Pool drivers

pub mod sqlite;

pub use sqlite::SqlitePoolDriver;
