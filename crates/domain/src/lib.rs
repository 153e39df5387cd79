//! # Keelson Domain
//!
//! Domain types and configuration for Keelson.
//!
//! This crate contains:
//! - Metric samples, alert rules and alerts
//! - Health check results and system health aggregation
//! - Connection pool metrics
//! - Configuration structures
//! - Error types and Result definitions
//!
//! ## Architecture
//! - No dependencies on other Keelson crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
