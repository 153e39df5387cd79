//! Domain types grouped by component

pub mod alerts;
pub mod health;
pub mod metrics;
pub mod pool;

pub use alerts::{Alert, AlertCondition, AlertRule, AlertSeverity, NotificationChannel};
pub use health::{HealthCheckResult, HealthStatus, SystemHealth};
pub use metrics::{MetricSample, MetricsQuery, MetricsSummary, ResourceUsage, TimeRange};
pub use pool::{PoolConfig, PoolMetrics, PoolState};
