//! Core data model for the analytics pipeline
//!
//! Everything here is request-scoped and immutable once built: samples come
//! in from the history fetcher, flow through the analysis stages, and the
//! resulting report is handed back to the caller. No type in this module
//! owns persistent state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// One timestamped numeric observation of a metric for a resource.
///
/// A sequence of samples for one `(resource_id, metric_name)` pair is
/// ordered by timestamp ascending. Duplicate timestamps are allowed and are
/// fed through in the order received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    /// Identifier of the monitored resource (instance id, database id, ...)
    pub resource_id: String,

    /// Name of the metric, e.g. `CPUUtilization`
    pub metric_name: String,

    /// Observation time
    pub timestamp: DateTime<Utc>,

    /// Observed value
    pub value: f64,

    /// Unit of measurement, when the provider reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl MetricSample {
    /// Convenience constructor used heavily in tests.
    pub fn new(
        resource_id: impl Into<String>,
        metric_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            metric_name: metric_name.into(),
            timestamp,
            value,
            unit: None,
        }
    }
}

/// A half-open analysis window; `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, rejecting inverted bounds.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DataError> {
        if start > end {
            return Err(DataError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window length.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Named time-range labels accepted by the analysis API.
///
/// Unknown labels fall back to 24 hours, matching what the dashboard sends
/// when no explicit range is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub label: String,
    pub hours: i64,
}

impl TimeRange {
    /// Parse a range label (`1h`, `6h`, `24h`, `7d`, `30d`).
    pub fn parse(label: &str) -> Self {
        let hours = match label {
            "1h" => 1,
            "6h" => 6,
            "24h" => 24,
            "7d" => 168,
            "30d" => 720,
            _ => 24,
        };
        Self {
            label: label.to_string(),
            hours,
        }
    }

    /// The window ending at `end` covered by this range.
    pub fn window_ending_at(&self, end: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: end - Duration::hours(self.hours),
            end,
        }
    }
}

/// Summary statistics over one sample sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticalSummary {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Qualitative classification of recent values against a longer baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    IncreasingRapidly,
    Decreasing,
    DecreasingRapidly,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::IncreasingRapidly => "increasing_rapidly",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::DecreasingRapidly => "decreasing_rapidly",
            TrendDirection::Stable => "stable",
        }
    }

    /// Whether the series is moving at all.
    pub fn is_moving(&self) -> bool {
        !matches!(self, TrendDirection::Stable)
    }
}

/// Output of the trend & volatility analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub direction: TrendDirection,

    /// Trailing short-window moving average, defined from index
    /// `short_window - 1` of the input onward.
    #[serde(rename = "shortMA")]
    pub short_ma: Vec<f64>,

    /// Trailing long-window moving average.
    #[serde(rename = "longMA")]
    pub long_ma: Vec<f64>,

    /// Population standard deviation of period-over-period relative returns.
    pub volatility: f64,
}

impl TrendResult {
    /// The degenerate result for sequences too short to analyze.
    pub fn stable() -> Self {
        Self {
            direction: TrendDirection::Stable,
            short_ma: Vec::new(),
            long_ma: Vec::new(),
            volatility: 0.0,
        }
    }
}

/// Per-point anomaly verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPoint {
    pub index: usize,
    pub timestamp: DateTime<Utc>,

    /// Normalized anomaly score, 0.0 (ordinary) to 1.0 (extreme).
    pub score: f64,
    pub is_anomaly: bool,
}

/// Output of the anomaly detector over one sample sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// One entry per input point, in input order.
    pub per_point: Vec<AnomalyPoint>,

    /// Number of points with `is_anomaly == true`.
    pub anomaly_count: usize,

    /// `anomaly_count / total points`, always over the full sequence.
    pub anomaly_rate: f64,

    /// True when the spike fraction exceeds the configured significance
    /// cutoff; a single flag for callers that do not want per-point detail.
    pub has_significant_anomalies: bool,
}

impl AnomalyResult {
    /// Number of input points this result covers.
    pub fn total_points(&self) -> usize {
        self.per_point.len()
    }

    /// Flagged points ranked by score, highest first.
    pub fn top_anomalies(&self, limit: usize) -> Vec<&AnomalyPoint> {
        let mut flagged: Vec<&AnomalyPoint> =
            self.per_point.iter().filter(|p| p.is_anomaly).collect();
        flagged.sort_by(|a, b| b.score.total_cmp(&a.score));
        flagged.truncate(limit);
        flagged
    }
}

/// Who produced an insight report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratedBy {
    /// The external completion service answered and the reply validated.
    Model,
    /// Deterministic fallback text.
    Fallback,
}

/// Why a report fell back to deterministic text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No completion credential configured; the service was never called.
    Unconfigured,
    /// The completion service failed after exhausting retries.
    ServiceError,
    /// The completion service answered but the reply was not usable JSON.
    InvalidFormat,
}

/// The structured natural-language output of the pipeline.
///
/// Always populated: every completion-service failure mode terminates in a
/// fallback report rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    pub summary: String,
    pub recommendations: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,

    pub generated_by: GeneratedBy,

    /// `None` whenever `generated_by == Model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
}
