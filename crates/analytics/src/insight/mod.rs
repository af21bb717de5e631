//! Insight synthesizer
//!
//! Turns the statistics, trend, and anomaly outputs into a natural-language
//! report. The happy path asks the completion service with bounded retries
//! and a strict JSON contract; every failure mode ends in a deterministic
//! fallback report instead. `synthesize` never returns an error.

pub mod completion;
pub mod parse;
pub mod prompt;
pub mod retry;

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::{
    AnomalyResult, FallbackReason, GeneratedBy, InsightReport, StatisticalSummary, TrendDirection,
    TrendResult,
};

pub use completion::{CompletionClient, CompletionError, GeminiClient};
pub use parse::{FormatError, ModelReport};
pub use retry::RetryPolicy;

/// Maximum raw-text preview carried into an invalid-format fallback.
const RAW_PREVIEW_LIMIT: usize = 500;

/// Identifies the series under analysis for prompt building and report
/// text.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub resource_id: String,
    pub metric_name: String,
    pub time_range_label: String,
}

/// The insight synthesizer.
///
/// Cheap to construct: request handlers build one per request so the
/// completion credential can vary per caller.
#[derive(Clone)]
pub struct InsightSynthesizer {
    client: Option<Arc<dyn CompletionClient>>,
    retry: RetryPolicy,
    min_history: usize,
}

impl InsightSynthesizer {
    pub fn new(
        client: Option<Arc<dyn CompletionClient>>,
        retry: RetryPolicy,
        min_history: usize,
    ) -> Self {
        Self {
            client,
            retry,
            min_history,
        }
    }

    /// Whether a completion client is configured at all.
    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Produce an insight report. Total over the happy/fallback space: a
    /// populated report comes back for every completion-service failure
    /// mode, including "no credential configured".
    pub async fn synthesize(
        &self,
        summary: &StatisticalSummary,
        trend: &TrendResult,
        anomalies: &AnomalyResult,
        context: &AnalysisContext,
        deadline: Option<Instant>,
    ) -> InsightReport {
        let low_confidence = anomalies.total_points() < self.min_history;

        let Some(client) = &self.client else {
            info!(
                resource = %context.resource_id,
                "completion service unconfigured, returning deterministic report"
            );
            return self.fallback(
                summary,
                trend,
                anomalies,
                context,
                FallbackReason::Unconfigured,
                Some(
                    "AI analysis unavailable: the completion service is not configured."
                        .to_string(),
                ),
                low_confidence,
            );
        };

        let prompt =
            prompt::build_metrics_prompt(summary, trend, anomalies, context, low_confidence);

        let outcome = self
            .retry
            .run(deadline, CompletionError::is_transient, |attempt| {
                let client = Arc::clone(client);
                let prompt = prompt.clone();
                async move {
                    if attempt > 0 {
                        debug!(attempt, "retrying completion request");
                    }
                    client.complete(&prompt).await
                }
            })
            .await;

        let raw = match outcome {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "completion service failed, falling back");
                return self.fallback(
                    summary,
                    trend,
                    anomalies,
                    context,
                    FallbackReason::ServiceError,
                    Some(format!("AI analysis failed: {err}.")),
                    low_confidence,
                );
            }
        };

        match parse::parse_report(&raw) {
            Ok(model) => {
                let mut report_summary = model.summary;
                if low_confidence {
                    annotate_low_confidence(&mut report_summary, anomalies.total_points());
                }
                InsightReport {
                    summary: report_summary,
                    recommendations: model.recommendations,
                    risk: model.risk,
                    generated_by: GeneratedBy::Model,
                    fallback_reason: None,
                }
            }
            Err(err) => {
                warn!(error = %err, "completion reply had invalid format, falling back");
                let preview = truncate_preview(&raw);
                self.fallback(
                    summary,
                    trend,
                    anomalies,
                    context,
                    FallbackReason::InvalidFormat,
                    Some(format!(
                        "The AI returned a response in an unexpected format. Raw preview: {preview}"
                    )),
                    low_confidence,
                )
            }
        }
    }

    /// Deterministic report built from the already-computed analysis.
    #[allow(clippy::too_many_arguments)]
    fn fallback(
        &self,
        summary: &StatisticalSummary,
        trend: &TrendResult,
        anomalies: &AnomalyResult,
        context: &AnalysisContext,
        reason: FallbackReason,
        note: Option<String>,
        low_confidence: bool,
    ) -> InsightReport {
        let mut text = format!(
            "{}/{} over {}: mean {:.2}, range {:.2}-{:.2}, trend {} (volatility {:.4}). {} of {} points flagged anomalous ({:.1}%).",
            context.resource_id,
            context.metric_name,
            context.time_range_label,
            summary.mean,
            summary.min,
            summary.max,
            trend.direction.as_str(),
            trend.volatility,
            anomalies.anomaly_count,
            anomalies.total_points(),
            anomalies.anomaly_rate * 100.0,
        );
        if let Some(note) = note {
            text.push(' ');
            text.push_str(&note);
        }
        if low_confidence {
            annotate_low_confidence(&mut text, anomalies.total_points());
        }

        let mut recommendations = Vec::new();
        if anomalies.has_significant_anomalies {
            recommendations
                .push("Investigate the flagged anomalies and their root cause".to_string());
        }
        if matches!(
            trend.direction,
            TrendDirection::IncreasingRapidly | TrendDirection::DecreasingRapidly
        ) {
            recommendations.push(format!(
                "Review capacity and alert thresholds for {}: the metric is {}",
                context.metric_name,
                trend.direction.as_str().replace('_', " ")
            ));
        }
        recommendations.push("Review the metrics patterns".to_string());
        recommendations.push("Set up monitoring alerts".to_string());
        if reason == FallbackReason::Unconfigured {
            recommendations
                .push("Configure the completion API key for AI-powered insights".to_string());
        }

        let risk = if anomalies.anomaly_rate > 0.2 {
            "high: a large fraction of recent points are anomalous"
        } else if anomalies.anomaly_count > 0 {
            "moderate: anomalies present but not widespread"
        } else {
            "low: no anomalies detected in the analyzed window"
        };

        InsightReport {
            summary: text,
            recommendations,
            risk: Some(risk.to_string()),
            generated_by: GeneratedBy::Fallback,
            fallback_reason: Some(reason),
        }
    }
}

fn annotate_low_confidence(summary: &mut String, points: usize) {
    summary.push_str(&format!(
        " [low confidence: only {points} samples available]"
    ));
}

fn truncate_preview(raw: &str) -> String {
    if raw.chars().count() <= RAW_PREVIEW_LIMIT {
        return raw.to_string();
    }
    let cut: String = raw.chars().take(RAW_PREVIEW_LIMIT).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnomalyPoint;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedClient {
        attempts: AtomicUsize,
        outcome: Box<dyn Fn(usize) -> Result<String, CompletionError> + Send + Sync>,
    }

    impl ScriptedClient {
        fn always(outcome: Result<String, CompletionError>) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                outcome: Box::new(move |_| outcome.clone()),
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(attempt)
        }
    }

    fn fixture(points: usize) -> (StatisticalSummary, TrendResult, AnomalyResult, AnalysisContext) {
        let summary = StatisticalSummary {
            mean: 28.0,
            median: 10.0,
            min: 10.0,
            max: 100.0,
            stddev: 36.0,
            p95: 100.0,
            p99: 100.0,
        };
        let trend = TrendResult::stable();
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let per_point: Vec<AnomalyPoint> = (0..points)
            .map(|index| AnomalyPoint {
                index,
                timestamp: ts,
                score: if index == points.saturating_sub(1) { 1.0 } else { 0.2 },
                is_anomaly: index == points.saturating_sub(1),
            })
            .collect();
        let anomaly_count = per_point.iter().filter(|p| p.is_anomaly).count();
        let anomalies = AnomalyResult {
            anomaly_count,
            anomaly_rate: anomaly_count as f64 / points.max(1) as f64,
            has_significant_anomalies: false,
            per_point,
        };
        let context = AnalysisContext {
            resource_id: "i-0abc123".to_string(),
            metric_name: "CPUUtilization".to_string(),
            time_range_label: "24h".to_string(),
        };
        (summary, trend, anomalies, context)
    }

    fn synthesizer_with(client: Arc<ScriptedClient>) -> InsightSynthesizer {
        InsightSynthesizer::new(
            Some(client),
            RetryPolicy::linear(Duration::from_secs(2), 3),
            11,
        )
    }

    #[tokio::test]
    async fn test_unconfigured_returns_fallback_without_calling_out() {
        let synthesizer = InsightSynthesizer::new(None, RetryPolicy::none(), 11);
        let (summary, trend, anomalies, context) = fixture(20);

        let report = synthesizer
            .synthesize(&summary, &trend, &anomalies, &context, None)
            .await;

        assert_eq!(report.generated_by, GeneratedBy::Fallback);
        assert_eq!(report.fallback_reason, Some(FallbackReason::Unconfigured));
        assert!(report.summary.contains("not configured"));
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_model_reply_passes_through() {
        let client = Arc::new(ScriptedClient::always(Ok(
            r#"{"summary": "CPU spiked once", "recommendations": ["check the deploy"], "risk": "moderate"}"#.to_string(),
        )));
        let synthesizer = synthesizer_with(client.clone());
        let (summary, trend, anomalies, context) = fixture(20);

        let report = synthesizer
            .synthesize(&summary, &trend, &anomalies, &context, None)
            .await;

        assert_eq!(report.generated_by, GeneratedBy::Model);
        assert!(report.fallback_reason.is_none());
        assert_eq!(report.summary, "CPU spiked once");
        assert_eq!(report.recommendations, vec!["check the deploy"]);
        assert_eq!(report.risk.as_deref(), Some("moderate"));
        assert_eq!(client.attempts(), 1);
    }

    #[tokio::test]
    async fn test_fenced_reply_parses() {
        let client = Arc::new(ScriptedClient::always(Ok(
            "```json\n{\"summary\": \"fenced\", \"recommendations\": []}\n```".to_string(),
        )));
        let synthesizer = synthesizer_with(client);
        let (summary, trend, anomalies, context) = fixture(20);

        let report = synthesizer
            .synthesize(&summary, &trend, &anomalies, &context, None)
            .await;
        assert_eq!(report.generated_by, GeneratedBy::Model);
        assert_eq!(report.summary, "fenced");
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_transient_makes_four_attempts_then_falls_back() {
        let client = Arc::new(ScriptedClient::always(Err(CompletionError::Transient(
            "completion service unavailable (503)".to_string(),
        ))));
        let synthesizer = synthesizer_with(client.clone());
        let (summary, trend, anomalies, context) = fixture(20);

        let report = synthesizer
            .synthesize(&summary, &trend, &anomalies, &context, None)
            .await;

        assert_eq!(client.attempts(), 4); // 1 initial + 3 retries
        assert_eq!(report.generated_by, GeneratedBy::Fallback);
        assert_eq!(report.fallback_reason, Some(FallbackReason::ServiceError));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_immediately() {
        let client = Arc::new(ScriptedClient::always(Err(CompletionError::Fatal(
            "401 unauthorized".to_string(),
        ))));
        let synthesizer = synthesizer_with(client.clone());
        let (summary, trend, anomalies, context) = fixture(20);

        let report = synthesizer
            .synthesize(&summary, &trend, &anomalies, &context, None)
            .await;

        assert_eq!(client.attempts(), 1);
        assert_eq!(report.fallback_reason, Some(FallbackReason::ServiceError));
    }

    #[tokio::test]
    async fn test_invalid_format_falls_back_with_preview() {
        let long_reply = "word ".repeat(200); // well past the preview limit
        let client = Arc::new(ScriptedClient::always(Ok(long_reply)));
        let synthesizer = synthesizer_with(client);
        let (summary, trend, anomalies, context) = fixture(20);

        let report = synthesizer
            .synthesize(&summary, &trend, &anomalies, &context, None)
            .await;

        assert_eq!(report.generated_by, GeneratedBy::Fallback);
        assert_eq!(report.fallback_reason, Some(FallbackReason::InvalidFormat));
        assert!(report.summary.contains("unexpected format"));
        // The preview is capped.
        assert!(report.summary.len() < 1200);
    }

    #[tokio::test]
    async fn test_low_confidence_annotation_on_short_history() {
        let client = Arc::new(ScriptedClient::always(Ok(
            r#"{"summary": "quiet", "recommendations": []}"#.to_string(),
        )));
        let synthesizer = synthesizer_with(client);
        let (summary, trend, anomalies, context) = fixture(5); // below min_history = 11

        let report = synthesizer
            .synthesize(&summary, &trend, &anomalies, &context, None)
            .await;

        assert_eq!(report.generated_by, GeneratedBy::Model);
        assert!(report.summary.contains("low confidence"));
    }

    #[test]
    fn test_truncate_preview_limits_length() {
        let short = "short reply";
        assert_eq!(truncate_preview(short), short);

        let long = "x".repeat(600);
        let preview = truncate_preview(&long);
        assert_eq!(preview.chars().count(), RAW_PREVIEW_LIMIT + 3);
        assert!(preview.ends_with("..."));
    }
}
