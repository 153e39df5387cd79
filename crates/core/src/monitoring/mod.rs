//! Metrics storage and threshold alerting.
//!
//! [`MetricsStore`] keeps a bounded ring of samples per `service:endpoint`
//! and hands every recorded sample to its [`AlertEngine`]. Fired alerts are
//! dispatched through a [`ports::Notifier`] without blocking the caller.

pub mod alerts;
pub mod notifier;
pub mod ports;
pub mod store;

pub use alerts::{default_rules, AlertEngine};
pub use notifier::{ChannelNotifier, Notification};
pub use store::MetricsStore;
