//! # Keelson Infrastructure
//!
//! Implementations of the `keelson-core` ports and process setup.
//!
//! This crate contains:
//! - Configuration loading from files and environment
//! - Tracing subscriber installation
//! - SQLite connection pools (r2d2)
//! - A notifier that emits alerts as tracing events
//!
//! ## Architecture
//! - Implements traits defined in `keelson-core`
//! - Contains all "impure" code (I/O, global subscriber state)

pub mod config;
pub mod notify;
pub mod observability;
pub mod pool;

pub use notify::TracingNotifier;
pub use observability::{init_tracing, ObservabilityError};
pub use pool::SqlitePoolDriver;
