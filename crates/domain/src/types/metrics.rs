//! Metric samples and query types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::ERROR_STATUS_THRESHOLD;

/* -------------------------------------------------------------------------- */
/* Samples */
/* -------------------------------------------------------------------------- */

/// Host resource usage captured alongside a sample, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_percent: f64,
    pub cpu_percent: f64,
}

/// One observed operation outcome
///
/// Samples are appended to the store and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub service: String,
    pub endpoint: String,
    pub response_time_ms: f64,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_usage: Option<ResourceUsage>,
}

impl MetricSample {
    pub fn new(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        response_time_ms: f64,
        status_code: u16,
    ) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            response_time_ms,
            status_code,
            timestamp: Utc::now(),
            resource_usage: None,
        }
    }

    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub const fn with_resource_usage(mut self, usage: ResourceUsage) -> Self {
        self.resource_usage = Some(usage);
        self
    }

    /// `service:endpoint` label for logs and listings. Not unique when
    /// either name contains `:`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.service, self.endpoint)
    }

    /// `true` for status codes of 400 and above
    pub const fn is_error(&self) -> bool {
        self.status_code >= ERROR_STATUS_THRESHOLD
    }
}

/* -------------------------------------------------------------------------- */
/* Queries */
/* -------------------------------------------------------------------------- */

/// Inclusive time range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Filter for metric queries; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsQuery {
    pub service: Option<String>,
    pub endpoint: Option<String>,
    pub time_range: Option<TimeRange>,
}

impl MetricsQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn service(service: impl Into<String>) -> Self {
        Self { service: Some(service.into()), ..Self::default() }
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub const fn within(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn matches(&self, sample: &MetricSample) -> bool {
        self.service.as_deref().map_or(true, |s| s == sample.service)
            && self.endpoint.as_deref().map_or(true, |e| e == sample.endpoint)
            && self.time_range.map_or(true, |r| r.contains(sample.timestamp))
    }
}

/// Aggregate view over the samples matching a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub count: usize,
    pub average_response_time_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Fraction of samples with an error status, in `[0, 1]`
    pub error_rate: f64,
}
