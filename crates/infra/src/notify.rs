//! Notifier that reports alerts as tracing events

use async_trait::async_trait;
use keelson_core::Notifier;
use keelson_domain::{Alert, AlertSeverity, MetricSample, NotificationChannel, Result};
use tracing::{error, warn};

/// Emits each delivery as a structured log event.
///
/// Delivery to the named target (mailbox, webhook, Slack channel) is left
/// to whatever consumes the log stream. Critical alerts log at `error!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(
        &self,
        channel: &NotificationChannel,
        alert: &Alert,
        sample: &MetricSample,
    ) -> Result<()> {
        let destination = match channel {
            NotificationChannel::Email(t)
            | NotificationChannel::Webhook(t)
            | NotificationChannel::Slack(t) => t.as_str(),
            NotificationChannel::Log => "",
        };

        if alert.severity == AlertSeverity::Critical {
            error!(
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                channel = channel.kind(),
                destination,
                service = %sample.service,
                endpoint = %sample.endpoint,
                response_time_ms = sample.response_time_ms,
                status_code = sample.status_code,
                "{}",
                alert.message
            );
        } else {
            warn!(
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                severity = ?alert.severity,
                channel = channel.kind(),
                destination,
                service = %sample.service,
                endpoint = %sample.endpoint,
                response_time_ms = sample.response_time_ms,
                status_code = sample.status_code,
                "{}",
                alert.message
            );
        }
        Ok(())
    }
}
