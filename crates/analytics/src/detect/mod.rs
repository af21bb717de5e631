//! Anomaly detector
//!
//! Two scoring methods behind one contract: a cheap deterministic
//! statistical scorer (the default), and delegation to an out-of-process
//! model worker for callers that want the heavier treatment. The detector
//! owns thresholds and the worker invocation protocol; it never owns the
//! model itself.

pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DetectionConfig;
use crate::error::{DataError, Result};
use crate::stats;
use crate::types::{AnomalyPoint, AnomalyResult, MetricSample};

pub use worker::{HttpScorer, ModelScorer, ScoreRequest, ScoreResponse, ScoredPoint};

/// Errors from an external scorer invocation. The statistical method never
/// produces these.
#[derive(Debug, Clone, Error)]
pub enum DetectionError {
    /// The worker did not reply within the configured bound.
    #[error("external scorer timed out: {message}")]
    Timeout { message: String },

    /// The worker could not be reached or died mid-request.
    #[error("external scorer failed: {message}")]
    Worker { message: String },

    /// The worker replied, but with something unusable.
    #[error("external scorer returned bad output: {message}")]
    BadOutput { message: String },
}

/// Scoring method selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Mean-relative spike scoring; deterministic, no I/O.
    #[default]
    Statistical,

    /// Delegate to the out-of-process model worker.
    #[serde(alias = "isolation_forest")]
    ExternalModel,
}

/// Per-request detection parameters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Overrides the configured score cutoff for `is_anomaly`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

/// The anomaly detector.
pub struct AnomalyDetector {
    config: DetectionConfig,
    scorer: Option<Arc<dyn ModelScorer>>,
}

impl AnomalyDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            scorer: None,
        }
    }

    /// Attach an external scorer for the `external_model` method.
    pub fn with_scorer(mut self, scorer: Arc<dyn ModelScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Score one sample sequence.
    ///
    /// `anomaly_rate` is always computed over all points regardless of the
    /// threshold. Short sequences are valid input; it is the synthesizer's
    /// job to annotate low-confidence results.
    ///
    /// # Errors
    ///
    /// [`DataError`] on an empty sequence; [`DetectionError`] when the
    /// external worker invocation fails. A failed invocation is never
    /// converted into an empty result.
    pub async fn detect(
        &self,
        samples: &[MetricSample],
        method: DetectionMethod,
        params: &DetectionParams,
    ) -> Result<AnomalyResult> {
        if samples.is_empty() {
            return Err(DataError::empty("anomaly detection requires at least one sample").into());
        }

        let threshold = params
            .threshold
            .unwrap_or(self.config.threshold)
            .clamp(0.0, 1.0);

        debug!(
            method = ?method,
            points = samples.len(),
            threshold,
            "running anomaly detection"
        );

        match method {
            DetectionMethod::Statistical => Ok(self.detect_statistical(samples, threshold)),
            DetectionMethod::ExternalModel => self.detect_external(samples, threshold).await,
        }
    }

    /// Mean-relative spike scoring.
    ///
    /// A point is a spike when `value > mean * spike_factor`; its score is
    /// the value's fraction of that cutoff, clamped into `[0, 1]`, so a
    /// spike always scores 1.0. When the cutoff is not positive (flat-zero
    /// or negative series) scores degrade to 0.0.
    fn detect_statistical(&self, samples: &[MetricSample], threshold: f64) -> AnomalyResult {
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let mean = stats::mean(&values);
        let cutoff = mean * self.config.spike_factor;

        let mut spike_count = 0usize;
        let per_point: Vec<AnomalyPoint> = samples
            .iter()
            .enumerate()
            .map(|(index, sample)| {
                if sample.value > cutoff {
                    spike_count += 1;
                }
                let score = if cutoff > 0.0 {
                    (sample.value / cutoff).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                AnomalyPoint {
                    index,
                    timestamp: sample.timestamp,
                    score,
                    is_anomaly: score >= threshold,
                }
            })
            .collect();

        self.assemble(per_point, spike_count)
    }

    /// Delegate scoring to the external worker, enforcing the configured
    /// invocation bound and validating the reply. Points the worker does
    /// not mention score 0.0.
    async fn detect_external(
        &self,
        samples: &[MetricSample],
        threshold: f64,
    ) -> Result<AnomalyResult> {
        let scorer = self.scorer.as_ref().ok_or_else(|| DetectionError::Worker {
            message: "no external scorer configured".to_string(),
        })?;

        let request = ScoreRequest {
            method: "isolation_forest".to_string(),
            metrics_data: samples.to_vec(),
        };

        let response = tokio::time::timeout(self.config.worker_timeout, scorer.score(&request))
            .await
            .map_err(|_| {
                warn!(
                    scorer = scorer.name(),
                    timeout_ms = self.config.worker_timeout.as_millis() as u64,
                    "external scorer invocation timed out"
                );
                DetectionError::Timeout {
                    message: format!(
                        "scorer {} exceeded {:?}",
                        scorer.name(),
                        self.config.worker_timeout
                    ),
                }
            })??;

        let mut scores: HashMap<usize, f64> = HashMap::with_capacity(response.scores.len());
        for point in &response.scores {
            if point.index >= samples.len() {
                return Err(DetectionError::BadOutput {
                    message: format!(
                        "score index {} out of range for {} samples",
                        point.index,
                        samples.len()
                    ),
                }
                .into());
            }
            if !point.score.is_finite() || !(0.0..=1.0).contains(&point.score) {
                return Err(DetectionError::BadOutput {
                    message: format!("score {} at index {} outside [0, 1]", point.score, point.index),
                }
                .into());
            }
            scores.insert(point.index, point.score);
        }

        // Spike significance is a property of the raw series and stays
        // comparable across methods.
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let cutoff = stats::mean(&values) * self.config.spike_factor;
        let spike_count = values.iter().filter(|&&v| v > cutoff).count();

        let per_point: Vec<AnomalyPoint> = samples
            .iter()
            .enumerate()
            .map(|(index, sample)| {
                let score = scores.get(&index).copied().unwrap_or(0.0);
                AnomalyPoint {
                    index,
                    timestamp: sample.timestamp,
                    score,
                    is_anomaly: score >= threshold,
                }
            })
            .collect();

        Ok(self.assemble(per_point, spike_count))
    }

    fn assemble(&self, per_point: Vec<AnomalyPoint>, spike_count: usize) -> AnomalyResult {
        let total = per_point.len();
        let anomaly_count = per_point.iter().filter(|p| p.is_anomaly).count();

        AnomalyResult {
            anomaly_count,
            anomaly_rate: anomaly_count as f64 / total as f64,
            has_significant_anomalies: spike_count as f64
                > self.config.significant_fraction * total as f64,
            per_point,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyticsError;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use std::time::Duration as StdDuration;

    fn samples_from(values: &[f64]) -> Vec<MetricSample> {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                MetricSample::new("i-test", "CPUUtilization", base + Duration::minutes(i as i64), v)
            })
            .collect()
    }

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(DetectionConfig::default())
    }

    struct FixedScorer {
        scores: Vec<ScoredPoint>,
    }

    #[async_trait]
    impl ModelScorer for FixedScorer {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn score(&self, _request: &ScoreRequest) -> Result<ScoreResponse, DetectionError> {
            Ok(ScoreResponse {
                scores: self.scores.clone(),
            })
        }
    }

    struct FailingScorer;

    #[async_trait]
    impl ModelScorer for FailingScorer {
        fn name(&self) -> &str {
            "failing"
        }

        async fn score(&self, _request: &ScoreRequest) -> Result<ScoreResponse, DetectionError> {
            Err(DetectionError::Worker {
                message: "worker crashed".to_string(),
            })
        }
    }

    struct SlowScorer;

    #[async_trait]
    impl ModelScorer for SlowScorer {
        fn name(&self) -> &str {
            "slow"
        }

        async fn score(&self, _request: &ScoreRequest) -> Result<ScoreResponse, DetectionError> {
            tokio::time::sleep(StdDuration::from_secs(60)).await;
            Ok(ScoreResponse { scores: Vec::new() })
        }
    }

    #[tokio::test]
    async fn test_spike_scenario() {
        // mean = 28, cutoff = 42: only the 100 crosses it.
        let samples = samples_from(&[10.0, 10.0, 10.0, 10.0, 100.0]);
        let result = detector()
            .detect(&samples, DetectionMethod::Statistical, &DetectionParams::default())
            .await
            .unwrap();

        assert_eq!(result.anomaly_count, 1);
        assert!((result.anomaly_rate - 0.2).abs() < 1e-9);
        assert!(result.per_point[4].is_anomaly);
        assert_eq!(result.per_point[4].score, 1.0);
        assert!(!result.per_point[0].is_anomaly);
        assert!(result.has_significant_anomalies); // 1 spike > 0.1 * 5
    }

    #[tokio::test]
    async fn test_empty_input_is_data_error() {
        let err = detector()
            .detect(&[], DetectionMethod::Statistical, &DetectionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Data(_)));
    }

    #[tokio::test]
    async fn test_rate_bounds_and_count_consistency() {
        let cases: Vec<Vec<f64>> = vec![
            vec![1.0],
            vec![5.0; 30],
            (0..41).map(|i| ((i * 13) % 29) as f64).collect(),
            vec![10.0, 10.0, 10.0, 10.0, 100.0],
        ];

        for values in cases {
            let samples = samples_from(&values);
            let result = detector()
                .detect(&samples, DetectionMethod::Statistical, &DetectionParams::default())
                .await
                .unwrap();

            assert!((0.0..=1.0).contains(&result.anomaly_rate));
            let n = result.per_point.len() as f64;
            assert!(((result.anomaly_rate * n).round() as usize).abs_diff(result.anomaly_count) == 0);
        }
    }

    #[tokio::test]
    async fn test_detect_is_idempotent() {
        let samples = samples_from(&[3.0, 9.0, 27.0, 81.0, 3.0, 9.0]);
        let first = detector()
            .detect(&samples, DetectionMethod::Statistical, &DetectionParams::default())
            .await
            .unwrap();
        let second = detector()
            .detect(&samples, DetectionMethod::Statistical, &DetectionParams::default())
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_threshold_override() {
        let samples = samples_from(&[10.0, 10.0, 10.0, 10.0, 100.0]);
        // Score of the flat points is 10/42 ~= 0.238; a threshold below that
        // flags everything.
        let result = detector()
            .detect(
                &samples,
                DetectionMethod::Statistical,
                &DetectionParams {
                    threshold: Some(0.2),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.anomaly_count, 5);
        assert!((result.anomaly_rate - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_short_history_is_valid_input() {
        let samples = samples_from(&[1.0, 2.0, 3.0]);
        let result = detector()
            .detect(&samples, DetectionMethod::Statistical, &DetectionParams::default())
            .await
            .unwrap();
        assert_eq!(result.total_points(), 3);
    }

    #[tokio::test]
    async fn test_external_scorer_scores_applied() {
        let samples = samples_from(&[1.0, 1.0, 1.0, 1.0, 9.0]);
        let detector = detector().with_scorer(Arc::new(FixedScorer {
            scores: vec![ScoredPoint {
                index: 4,
                score: 0.95,
            }],
        }));

        let result = detector
            .detect(&samples, DetectionMethod::ExternalModel, &DetectionParams::default())
            .await
            .unwrap();

        assert_eq!(result.anomaly_count, 1);
        assert!(result.per_point[4].is_anomaly);
        // Unlisted points default to 0.0
        assert_eq!(result.per_point[0].score, 0.0);
        assert!((result.anomaly_rate - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_external_scorer_failure_propagates() {
        let samples = samples_from(&[1.0, 2.0, 3.0]);
        let detector = detector().with_scorer(Arc::new(FailingScorer));

        let err = detector
            .detect(&samples, DetectionMethod::ExternalModel, &DetectionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::Detection(DetectionError::Worker { .. })
        ));
    }

    #[tokio::test]
    async fn test_external_scorer_timeout() {
        let samples = samples_from(&[1.0, 2.0, 3.0]);
        let mut config = DetectionConfig::default();
        config.worker_timeout = StdDuration::from_millis(20);
        let detector = AnomalyDetector::new(config).with_scorer(Arc::new(SlowScorer));

        let err = detector
            .detect(&samples, DetectionMethod::ExternalModel, &DetectionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::Detection(DetectionError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_external_scorer_bad_index_rejected() {
        let samples = samples_from(&[1.0, 2.0]);
        let detector = detector().with_scorer(Arc::new(FixedScorer {
            scores: vec![ScoredPoint {
                index: 7,
                score: 0.5,
            }],
        }));

        let err = detector
            .detect(&samples, DetectionMethod::ExternalModel, &DetectionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::Detection(DetectionError::BadOutput { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_scorer_is_detection_error() {
        let samples = samples_from(&[1.0, 2.0]);
        let err = detector()
            .detect(&samples, DetectionMethod::ExternalModel, &DetectionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Detection(_)));
    }

    #[test]
    fn test_method_accepts_isolation_forest_alias() {
        let method: DetectionMethod = serde_json::from_str("\"isolation_forest\"").unwrap();
        assert_eq!(method, DetectionMethod::ExternalModel);
        let method: DetectionMethod = serde_json::from_str("\"statistical\"").unwrap();
        assert_eq!(method, DetectionMethod::Statistical);
    }
}
