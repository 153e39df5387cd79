//! In-process notifier backed by a tokio channel

use async_trait::async_trait;
use keelson_domain::{Alert, KeelsonError, MetricSample, NotificationChannel, Result};
use tokio::sync::mpsc;

use super::ports::Notifier;

/// One delivery handed to a [`ChannelNotifier`]
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub channel: NotificationChannel,
    pub alert: Alert,
    pub sample: MetricSample,
}

/// Forwards every delivery to an unbounded receiver.
///
/// Useful for in-process consumers such as a dashboard feed, and for tests.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(
        &self,
        channel: &NotificationChannel,
        alert: &Alert,
        sample: &MetricSample,
    ) -> Result<()> {
        self.sender
            .send(Notification {
                channel: channel.clone(),
                alert: alert.clone(),
                sample: sample.clone(),
            })
            .map_err(|_| KeelsonError::Notification("notification receiver dropped".to_string()))
    }
}
