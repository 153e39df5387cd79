//! # Keelson Core
//!
//! Policy engine services built on the `keelson-common` primitives.
//!
//! This crate contains:
//! - Graceful degradation with per-feature fallbacks
//! - Metrics storage and threshold alerting
//! - Health probe execution and aggregation
//! - Connection pool management and monitoring
//! - Periodic maintenance of metrics and rate-limit windows
//!
//! ## Architecture Principles
//! - Depends on `keelson-common` and `keelson-domain` only
//! - No database, HTTP, or platform code
//! - All external collaborators via traits (`Notifier`, `HealthProbe`,
//!   `PoolDriver`)

pub mod degradation;
pub mod health;
pub mod maintenance;
pub mod monitoring;
pub mod pool;
pub mod scheduling;
pub mod settings;

pub use degradation::{Fallback, GracefulDegradationRegistry};
pub use health::ports::{HealthProbe, ProbeReport};
pub use health::HealthCheckEngine;
pub use maintenance::{MaintenanceReport, MaintenanceScheduler};
pub use monitoring::ports::Notifier;
pub use monitoring::{AlertEngine, ChannelNotifier, MetricsStore, Notification};
pub use pool::ports::{ConnectionPool, PoolDriver, PooledConnection, QueryResult, SqlValue};
pub use pool::{PoolError, PoolHealthProbe, PoolMonitor, PoolWarning, ResourcePoolManager};
pub use scheduling::{SchedulerError, SchedulerResult};
pub use settings::IntoRuntime;
