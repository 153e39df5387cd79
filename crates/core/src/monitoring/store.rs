//! Bounded in-memory metric storage with query helpers

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keelson_common::collections::RingBuffer;
use keelson_domain::constants::MAX_SAMPLES_PER_ENDPOINT;
use keelson_domain::{Alert, MetricSample, MetricsQuery, MetricsSummary};
use parking_lot::Mutex;
use tracing::debug;

use super::alerts::AlertEngine;

/// Buffers are keyed by the `(service, endpoint)` pair, so names containing
/// `:` never share a buffer.
type SeriesKey = (String, String);

fn series_key(service: &str, endpoint: &str) -> SeriesKey {
    (service.to_string(), endpoint.to_string())
}

/// Per-`service:endpoint` ring buffers of samples.
///
/// Recording a sample also evaluates it against the alert engine.
#[derive(Debug)]
pub struct MetricsStore {
    buffers: Mutex<HashMap<SeriesKey, RingBuffer<MetricSample>>>,
    capacity: usize,
    alerts: Arc<AlertEngine>,
}

impl MetricsStore {
    pub fn new(alerts: Arc<AlertEngine>) -> Self {
        Self::with_capacity(alerts, MAX_SAMPLES_PER_ENDPOINT)
    }

    /// Store keeping at most `capacity` samples per key
    pub fn with_capacity(alerts: Arc<AlertEngine>, capacity: usize) -> Self {
        Self { buffers: Mutex::new(HashMap::new()), capacity: capacity.max(1), alerts }
    }

    pub fn alert_engine(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    /// Appends `sample`, evicting the oldest one for its key when full, then
    /// evaluates alert rules. Returns the alerts that fired.
    pub fn record_metric(&self, sample: MetricSample) -> Vec<Alert> {
        {
            let mut buffers = self.buffers.lock();
            let buffer = buffers
                .entry(series_key(&sample.service, &sample.endpoint))
                .or_insert_with(|| RingBuffer::new(self.capacity));
            if buffer.push(sample.clone()).is_some() {
                debug!(key = %sample.key(), "Evicted oldest sample");
            }
        }
        self.alerts.evaluate(&sample)
    }

    /// Matching samples, oldest first
    pub fn get_metrics(&self, query: &MetricsQuery) -> Vec<MetricSample> {
        let mut samples = self.collect(query);
        samples.sort_by_key(|s| s.timestamp);
        samples
    }

    /// Mean response time of matching samples, 0 when none match
    pub fn average_response_time(&self, query: &MetricsQuery) -> f64 {
        let samples = self.collect(query);
        mean(samples.iter().map(|s| s.response_time_ms), samples.len())
    }

    /// Fraction of matching samples with an error status, 0 when none match
    pub fn error_rate(&self, query: &MetricsQuery) -> f64 {
        let samples = self.collect(query);
        mean(samples.iter().map(|s| if s.is_error() { 1.0 } else { 0.0 }), samples.len())
    }

    /// Count, mean, nearest-rank percentiles and error rate for a query.
    pub fn summary(&self, query: &MetricsQuery) -> MetricsSummary {
        let samples = self.collect(query);
        if samples.is_empty() {
            return MetricsSummary::default();
        }

        let mut times: Vec<f64> = samples.iter().map(|s| s.response_time_ms).collect();
        times.sort_by(f64::total_cmp);
        let errors = samples.iter().filter(|s| s.is_error()).count();

        MetricsSummary {
            count: samples.len(),
            average_response_time_ms: mean(times.iter().copied(), times.len()),
            p50_ms: percentile(&times, 50),
            p95_ms: percentile(&times, 95),
            p99_ms: percentile(&times, 99),
            min_ms: times[0],
            max_ms: times[times.len() - 1],
            error_rate: ratio(errors, samples.len()),
        }
    }

    /// Drops samples older than `older_than`, or everything when `None`.
    ///
    /// Keys left empty are removed. Returns the number of samples dropped.
    pub fn clear_metrics(&self, older_than: Option<DateTime<Utc>>) -> usize {
        let mut buffers = self.buffers.lock();
        let Some(cutoff) = older_than else {
            let removed = buffers.values().map(RingBuffer::len).sum();
            buffers.clear();
            return removed;
        };

        let removed = buffers.values_mut().map(|buffer| buffer.retain(|s| s.timestamp >= cutoff)).sum();
        buffers.retain(|_, buffer| !buffer.is_empty());
        removed
    }

    /// Drops every sample for one `service:endpoint` key.
    pub fn clear_endpoint(&self, service: &str, endpoint: &str) -> usize {
        self.buffers.lock().remove(&series_key(service, endpoint)).map_or(0, |b| b.len())
    }

    /// Tracked keys as `service:endpoint` labels, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .buffers
            .lock()
            .keys()
            .map(|(service, endpoint)| format!("{service}:{endpoint}"))
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Total samples across every key
    pub fn sample_count(&self) -> usize {
        self.buffers.lock().values().map(RingBuffer::len).sum()
    }

    fn collect(&self, query: &MetricsQuery) -> Vec<MetricSample> {
        let buffers = self.buffers.lock();
        if let (Some(service), Some(endpoint)) = (&query.service, &query.endpoint) {
            return buffers
                .get(&series_key(service, endpoint))
                .map(|buffer| buffer.iter().filter(|s| query.matches(s)).cloned().collect())
                .unwrap_or_default();
        }
        buffers.values().flat_map(RingBuffer::iter).filter(|s| query.matches(s)).cloned().collect()
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    values.sum::<f64>() / count as f64
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Nearest-rank percentile over sorted, non-empty `values`.
fn percentile(values: &[f64], pct: usize) -> f64 {
    let rank = (pct * values.len()).div_ceil(100).max(1);
    values[rank.min(values.len()) - 1]
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use keelson_domain::{AlertCondition, AlertRule, AlertSeverity, TimeRange};

    use super::*;
    use crate::monitoring::notifier::ChannelNotifier;

    fn store() -> MetricsStore {
        let (notifier, _receiver) = ChannelNotifier::new();
        MetricsStore::new(Arc::new(AlertEngine::new(Arc::new(notifier))))
    }

    /// Validates that each key keeps at most its capacity, oldest evicted.
    #[test]
    fn test_ring_buffer_cap_per_key() {
        let (notifier, _receiver) = ChannelNotifier::new();
        let store = MetricsStore::with_capacity(Arc::new(AlertEngine::new(Arc::new(notifier))), 3);
        let base = Utc::now();
        for i in 0..5 {
            store.record_metric(
                MetricSample::new("api", "/a", f64::from(i), 200).at(base + Duration::seconds(i.into())),
            );
        }
        store.record_metric(MetricSample::new("api", "/b", 1.0, 200));

        let a = store.get_metrics(&MetricsQuery::service("api").endpoint("/a"));
        assert_eq!(a.len(), 3);
        assert!((a[0].response_time_ms - 2.0).abs() < f64::EPSILON, "Oldest two evicted");
        assert_eq!(store.sample_count(), 4);
        assert_eq!(store.keys(), vec!["api:/a".to_string(), "api:/b".to_string()]);
    }

    #[test]
    fn test_colons_in_names_do_not_collide() {
        let store = store();
        store.record_metric(MetricSample::new("a:b", "c", 10.0, 200));
        store.record_metric(MetricSample::new("a", "b:c", 20.0, 500));

        let first = store.get_metrics(&MetricsQuery::service("a:b").endpoint("c"));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status_code, 200);
        assert_eq!(store.get_metrics(&MetricsQuery::service("a").endpoint("b:c")).len(), 1);

        assert_eq!(store.clear_endpoint("a:b", "c"), 1);
        assert_eq!(store.sample_count(), 1, "Only the matching series is cleared");
    }

    #[test]
    fn test_default_capacity_is_1000() {
        let store = store();
        for _ in 0..1_200 {
            store.record_metric(MetricSample::new("api", "/a", 10.0, 200));
        }
        assert_eq!(store.sample_count(), MAX_SAMPLES_PER_ENDPOINT);
    }

    #[test]
    fn test_average_and_error_rate() {
        let store = store();
        assert!(store.average_response_time(&MetricsQuery::all()).abs() < f64::EPSILON);
        assert!(store.error_rate(&MetricsQuery::all()).abs() < f64::EPSILON);

        store.record_metric(MetricSample::new("api", "/a", 100.0, 200));
        store.record_metric(MetricSample::new("api", "/a", 300.0, 500));
        store.record_metric(MetricSample::new("web", "/", 200.0, 404));
        store.record_metric(MetricSample::new("web", "/", 400.0, 200));

        let all = MetricsQuery::all();
        assert!((store.average_response_time(&all) - 250.0).abs() < 1e-9);
        assert!((store.error_rate(&all) - 0.5).abs() < 1e-9);

        let api = MetricsQuery::service("api");
        assert!((store.average_response_time(&api) - 200.0).abs() < 1e-9);
        assert!((store.error_rate(&api) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_time_range_filter_and_sorting() {
        let store = store();
        let now = Utc::now();
        store.record_metric(MetricSample::new("api", "/a", 1.0, 200).at(now));
        store.record_metric(MetricSample::new("api", "/a", 2.0, 200).at(now - Duration::hours(2)));
        store.record_metric(MetricSample::new("web", "/", 3.0, 200).at(now - Duration::minutes(5)));

        let recent = store.get_metrics(
            &MetricsQuery::all().within(TimeRange::new(now - Duration::hours(1), now)),
        );
        let times: Vec<f64> = recent.iter().map(|s| s.response_time_ms).collect();
        assert_eq!(times, vec![3.0, 1.0], "Filtered to the last hour, oldest first");
    }

    #[test]
    fn test_summary_percentiles() {
        let store = store();
        for ms in 1..=100 {
            let status = if ms % 10 == 0 { 500 } else { 200 };
            store.record_metric(MetricSample::new("api", "/a", f64::from(ms), status));
        }

        let summary = store.summary(&MetricsQuery::all());
        assert_eq!(summary.count, 100);
        assert!((summary.p50_ms - 50.0).abs() < f64::EPSILON);
        assert!((summary.p95_ms - 95.0).abs() < f64::EPSILON);
        assert!((summary.p99_ms - 99.0).abs() < f64::EPSILON);
        assert!((summary.min_ms - 1.0).abs() < f64::EPSILON);
        assert!((summary.max_ms - 100.0).abs() < f64::EPSILON);
        assert!((summary.error_rate - 0.1).abs() < 1e-9);

        assert_eq!(store.summary(&MetricsQuery::service("none")), MetricsSummary::default());
    }

    #[test]
    fn test_clear_by_age_and_endpoint() {
        let store = store();
        let now = Utc::now();
        store.record_metric(MetricSample::new("api", "/a", 1.0, 200).at(now - Duration::days(2)));
        store.record_metric(MetricSample::new("api", "/a", 2.0, 200).at(now));
        store.record_metric(MetricSample::new("api", "/old", 3.0, 200).at(now - Duration::days(3)));
        store.record_metric(MetricSample::new("web", "/", 4.0, 200).at(now));

        let removed = store.clear_metrics(Some(now - Duration::days(1)));
        assert_eq!(removed, 2);
        assert_eq!(store.keys(), vec!["api:/a".to_string(), "web:/".to_string()], "Empty keys dropped");

        assert_eq!(store.clear_endpoint("web", "/"), 1);
        assert_eq!(store.clear_endpoint("web", "/"), 0);
        assert_eq!(store.clear_metrics(None), 1);
        assert_eq!(store.sample_count(), 0);
    }

    /// Validates that recording evaluates alert rules.
    #[tokio::test]
    async fn test_record_metric_fires_alerts() {
        let (notifier, mut receiver) = ChannelNotifier::new();
        let engine = AlertEngine::new(Arc::new(notifier)).with_rules([AlertRule::new(
            "errors",
            "Errors",
            AlertCondition::ErrorRateHigh,
            0.0,
            AlertSeverity::Medium,
        )]);
        let store = MetricsStore::new(Arc::new(engine));

        assert!(store.record_metric(MetricSample::new("api", "/a", 5.0, 200)).is_empty());
        let fired = store.record_metric(MetricSample::new("api", "/a", 5.0, 502));
        assert_eq!(fired.len(), 1);

        let delivered = receiver.recv().await.expect("notification");
        assert_eq!(delivered.alert.rule_id, "errors");
        assert_eq!(delivered.sample.status_code, 502);
    }
}
