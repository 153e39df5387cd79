//! Health probe registration, execution and aggregation.

pub mod ports;
pub mod service;

pub use ports::{HealthProbe, ProbeReport};
pub use service::HealthCheckEngine;
