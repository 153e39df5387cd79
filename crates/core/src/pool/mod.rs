//! Connection pool management.
//!
//! [`ResourcePoolManager`] opens pools through a [`ports::PoolDriver`] and
//! keeps per-pool [`keelson_domain::PoolMetrics`]. [`PoolMonitor`] checks
//! those metrics on an interval and [`PoolHealthProbe`] exposes the same
//! checks to the health engine.

pub mod error;
pub mod manager;
pub mod monitor;
pub mod ports;
pub mod probe;

pub use error::{PoolError, PoolResult};
pub use manager::ResourcePoolManager;
pub use monitor::{evaluate_pools, PoolMonitor, PoolWarning};
pub use probe::PoolHealthProbe;

#[cfg(test)]
pub(crate) mod testing;
