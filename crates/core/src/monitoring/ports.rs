//! Outbound ports for alert delivery

use async_trait::async_trait;
use keelson_domain::{Alert, MetricSample, NotificationChannel, Result};

/// Delivers fired alerts to a notification channel.
///
/// Implementations own the transport (mail, webhook, chat). Delivery runs in
/// a spawned task; a returned error is logged and otherwise ignored.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        channel: &NotificationChannel,
        alert: &Alert,
        sample: &MetricSample,
    ) -> Result<()>;
}
