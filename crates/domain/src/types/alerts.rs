//! Alert rules and fired alerts

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metrics::MetricSample;
use crate::constants::DEFAULT_ALERT_COOLDOWN_MINUTES;

/// Comparison a rule applies to each sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    /// `response_time_ms > threshold`
    ResponseTimeHigh,
    /// `memory_percent > threshold`
    MemoryHigh,
    /// `cpu_percent > threshold`
    CpuHigh,
    /// Status code of 400 or above; the threshold is not consulted
    ErrorRateHigh,
}

impl AlertCondition {
    /// Whether `sample` satisfies this condition against `threshold`.
    ///
    /// Memory and cpu conditions never hold for samples without resource
    /// usage.
    pub fn holds(self, sample: &MetricSample, threshold: f64) -> bool {
        match self {
            Self::ResponseTimeHigh => sample.response_time_ms > threshold,
            Self::MemoryHigh => sample.resource_usage.is_some_and(|u| u.memory_percent > threshold),
            Self::CpuHigh => sample.resource_usage.is_some_and(|u| u.cpu_percent > threshold),
            Self::ErrorRateHigh => sample.is_error(),
        }
    }

    /// Observed value for the alert message
    pub fn observed(self, sample: &MetricSample) -> Option<f64> {
        match self {
            Self::ResponseTimeHigh => Some(sample.response_time_ms),
            Self::MemoryHigh => sample.resource_usage.map(|u| u.memory_percent),
            Self::CpuHigh => sample.resource_usage.map(|u| u.cpu_percent),
            Self::ErrorRateHigh => Some(f64::from(sample.status_code)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Destination a fired alert is handed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "lowercase")]
pub enum NotificationChannel {
    Email(String),
    Webhook(String),
    Slack(String),
    Log,
}

impl NotificationChannel {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Email(_) => "email",
            Self::Webhook(_) => "webhook",
            Self::Slack(_) => "slack",
            Self::Log => "log",
        }
    }
}

/// Threshold rule evaluated against every recorded sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub severity: AlertSeverity,
    pub enabled: bool,
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
    pub cooldown_minutes: u32,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        condition: AlertCondition,
        threshold: f64,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            condition,
            threshold,
            severity,
            enabled: true,
            channels: vec![NotificationChannel::Log],
            cooldown_minutes: DEFAULT_ALERT_COOLDOWN_MINUTES,
            last_triggered: None,
        }
    }

    #[must_use]
    pub fn with_channels(mut self, channels: Vec<NotificationChannel>) -> Self {
        self.channels = channels;
        self
    }

    #[must_use]
    pub const fn with_cooldown_minutes(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    /// `true` when the rule has never fired or its cooldown has elapsed at
    /// `now`.
    pub fn cooled_down(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered.map_or(true, |last| {
            now.signed_duration_since(last) >= Duration::minutes(i64::from(self.cooldown_minutes))
        })
    }
}

/// A rule firing for one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub service: String,
    pub endpoint: String,
    pub triggered_at: DateTime<Utc>,
}

impl Alert {
    pub fn from_rule(rule: &AlertRule, sample: &MetricSample, triggered_at: DateTime<Utc>) -> Self {
        let observed = rule
            .condition
            .observed(sample)
            .map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}"));
        Self {
            id: Uuid::now_v7(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            message: format!(
                "{} on {}:{} (observed {observed}, threshold {})",
                rule.name, sample.service, sample.endpoint, rule.threshold
            ),
            service: sample.service.clone(),
            endpoint: sample.endpoint.clone(),
            triggered_at,
        }
    }
}
