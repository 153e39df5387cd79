//! Rule evaluation, cooldown tracking and notification dispatch

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keelson_common::clock::{Clock, SystemClock};
use keelson_domain::{
    Alert, AlertCondition, AlertRule, AlertSeverity, MetricSample, NotificationChannel,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::ports::Notifier;

/// Evaluates alert rules against samples and dispatches fired alerts.
pub struct AlertEngine {
    rules: Mutex<Vec<AlertRule>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertEngine").field("rules", &self.rules.lock().len()).finish()
    }
}

impl AlertEngine {
    /// Engine with no rules, reading time from the system clock
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self::with_clock(notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self { rules: Mutex::new(Vec::new()), notifier, clock }
    }

    /// Adds every rule in `rules`.
    #[must_use]
    pub fn with_rules(self, rules: impl IntoIterator<Item = AlertRule>) -> Self {
        for rule in rules {
            self.add_rule(rule);
        }
        self
    }

    /// Adds `rule`, replacing any rule with the same id.
    ///
    /// Returns `true` when a rule was replaced.
    pub fn add_rule(&self, rule: AlertRule) -> bool {
        let mut rules = self.rules.lock();
        if let Some(existing) = rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule;
            true
        } else {
            rules.push(rule);
            false
        }
    }

    pub fn remove_rule(&self, id: &str) -> Option<AlertRule> {
        let mut rules = self.rules.lock();
        let index = rules.iter().position(|r| r.id == id)?;
        Some(rules.remove(index))
    }

    /// Returns `false` when no rule has this id.
    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
        self.rules.lock().iter_mut().find(|r| r.id == id).map(|r| r.enabled = enabled).is_some()
    }

    pub fn rule(&self, id: &str) -> Option<AlertRule> {
        self.rules.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Snapshot of the current rules in insertion order
    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.lock().clone()
    }

    /// Evaluates every enabled rule against `sample`.
    ///
    /// A rule fires when its condition holds and its cooldown has elapsed;
    /// firing stamps `last_triggered` and dispatches one notification per
    /// channel on a spawned task. Returns the alerts that fired.
    pub fn evaluate(&self, sample: &MetricSample) -> Vec<Alert> {
        let now: DateTime<Utc> = self.clock.system_time().into();

        let fired: Vec<(Alert, Vec<NotificationChannel>)> = {
            let mut rules = self.rules.lock();
            rules
                .iter_mut()
                .filter(|rule| rule.enabled && rule.condition.holds(sample, rule.threshold))
                .filter_map(|rule| {
                    if !rule.cooled_down(now) {
                        debug!(rule_id = %rule.id, "Alert suppressed by cooldown");
                        return None;
                    }
                    rule.last_triggered = Some(now);
                    Some((Alert::from_rule(rule, sample, now), rule.channels.clone()))
                })
                .collect()
        };

        fired
            .into_iter()
            .map(|(alert, channels)| {
                warn!(
                    rule_id = %alert.rule_id,
                    severity = ?alert.severity,
                    service = %alert.service,
                    endpoint = %alert.endpoint,
                    "{}",
                    alert.message
                );
                self.dispatch(&alert, sample, channels);
                alert
            })
            .collect()
    }

    fn dispatch(
        &self,
        alert: &Alert,
        sample: &MetricSample,
        channels: Vec<NotificationChannel>,
    ) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(rule_id = %alert.rule_id, "No async runtime, skipping alert notification");
            return;
        };
        for channel in channels {
            let notifier = Arc::clone(&self.notifier);
            let alert = alert.clone();
            let sample = sample.clone();
            handle.spawn(async move {
                match notifier.send(&channel, &alert, &sample).await {
                    Ok(()) => {
                        debug!(rule_id = %alert.rule_id, channel = channel.kind(), "Alert delivered");
                    }
                    Err(err) => {
                        error!(
                            rule_id = %alert.rule_id,
                            channel = channel.kind(),
                            error = %err,
                            "Alert delivery failed"
                        );
                    }
                }
            });
        }
    }
}

/// Standard rule set: slow responses, memory, cpu and error statuses.
pub fn default_rules() -> Vec<AlertRule> {
    let rules = vec![
        AlertRule::new(
            "response-time-high",
            "High response time",
            AlertCondition::ResponseTimeHigh,
            2_000.0,
            AlertSeverity::High,
        ),
        AlertRule::new(
            "memory-high",
            "High memory usage",
            AlertCondition::MemoryHigh,
            90.0,
            AlertSeverity::Critical,
        ),
        AlertRule::new("cpu-high", "High CPU usage", AlertCondition::CpuHigh, 85.0, AlertSeverity::High),
        AlertRule::new(
            "error-rate-high",
            "Error response",
            AlertCondition::ErrorRateHigh,
            0.0,
            AlertSeverity::Medium,
        ),
    ];
    info!(count = rules.len(), "Loaded default alert rules");
    rules
}
