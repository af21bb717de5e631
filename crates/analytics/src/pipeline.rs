//! Per-request analysis orchestration
//!
//! One pipeline instance serves one analysis request: fetch history, then
//! Statistics → Trend → Anomaly → Synthesis, strictly in that order, each
//! stage consuming the previous stage's output. Nothing survives the
//! request; the pipeline is built from cheap `Arc` clones by the handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::detect::{AnomalyDetector, DetectionMethod, DetectionParams};
use crate::error::Result;
use crate::history::{HistoryFetcher, HistoryRequest};
use crate::insight::{AnalysisContext, InsightSynthesizer};
use crate::stats;
use crate::trend;
use crate::types::{
    AnomalyPoint, GeneratedBy, InsightReport, StatisticalSummary, TimeRange, TrendResult,
};

/// One analysis request from the chat/alerting surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub service: String,
    pub resource_id: String,
    pub metric_name: String,

    /// Range label (`1h`, `6h`, `24h`, `7d`, `30d`); unknown labels read as
    /// 24h.
    #[serde(default = "default_time_range")]
    pub time_range: String,
}

fn default_time_range() -> String {
    "24h".to_string()
}

/// Header block of an analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub total_data_points: usize,
    pub time_range: String,
    pub service: String,
    pub metric_name: String,
    pub anomaly_rate: f64,
    pub analysis_timestamp: DateTime<Utc>,
}

/// The full analysis produced for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsAnalysis {
    pub summary: AnalysisSummary,

    /// Absent when no samples were available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<StatisticalSummary>,

    /// Flagged points only, in input order.
    pub anomalies: Vec<AnomalyPoint>,

    /// Absent when no samples were available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trends: Option<TrendResult>,

    pub recommendations: Vec<String>,

    #[serde(rename = "aiInsights")]
    pub ai_insights: InsightReport,
}

/// The analysis pipeline for one request.
pub struct AnalysisPipeline {
    fetcher: Arc<dyn HistoryFetcher>,
    detector: Arc<AnomalyDetector>,
    synthesizer: InsightSynthesizer,
}

impl AnalysisPipeline {
    pub fn new(
        fetcher: Arc<dyn HistoryFetcher>,
        detector: Arc<AnomalyDetector>,
        synthesizer: InsightSynthesizer,
    ) -> Self {
        Self {
            fetcher,
            detector,
            synthesizer,
        }
    }

    /// Run the full pipeline.
    ///
    /// "No samples for the window" is a defined result, not an error; only
    /// fetch failures and detection failures propagate.
    pub async fn run(&self, request: &AnalysisRequest) -> Result<MetricsAnalysis> {
        self.run_with_deadline(request, None).await
    }

    /// As [`run`](Self::run), with a deadline that in-flight completion
    /// retries must not cross.
    pub async fn run_with_deadline(
        &self,
        request: &AnalysisRequest,
        deadline: Option<Instant>,
    ) -> Result<MetricsAnalysis> {
        let request_id = Uuid::new_v4();
        let range = TimeRange::parse(&request.time_range);
        let window = range.window_ending_at(Utc::now());

        info!(
            %request_id,
            service = %request.service,
            resource = %request.resource_id,
            metric = %request.metric_name,
            range = %range.label,
            "starting metrics analysis"
        );

        let mut samples = self
            .fetcher
            .fetch(&HistoryRequest {
                resource_id: request.resource_id.clone(),
                metric_name: request.metric_name.clone(),
                window,
            })
            .await?;

        if samples.is_empty() {
            debug!("no samples in window, returning empty analysis");
            return Ok(Self::empty_analysis(request));
        }

        // The trend analyzer requires ascending timestamps; enforce the
        // ordering here rather than trusting the collaborator.
        samples.sort_by_key(|s| s.timestamp);

        let summary = stats::summarize(&samples)?;
        let trend_result = trend::analyze_trend(&samples);
        let anomalies = self
            .detector
            .detect(&samples, DetectionMethod::Statistical, &DetectionParams::default())
            .await?;

        let context = AnalysisContext {
            resource_id: request.resource_id.clone(),
            metric_name: request.metric_name.clone(),
            time_range_label: range.label.clone(),
        };
        let report = self
            .synthesizer
            .synthesize(&summary, &trend_result, &anomalies, &context, deadline)
            .await;

        let flagged: Vec<AnomalyPoint> = anomalies
            .per_point
            .iter()
            .filter(|p| p.is_anomaly)
            .cloned()
            .collect();

        info!(
            %request_id,
            points = samples.len(),
            anomalies = flagged.len(),
            generated_by = ?report.generated_by,
            "metrics analysis complete"
        );

        Ok(MetricsAnalysis {
            summary: AnalysisSummary {
                total_data_points: samples.len(),
                time_range: range.label,
                service: request.service.clone(),
                metric_name: request.metric_name.clone(),
                anomaly_rate: anomalies.anomaly_rate,
                analysis_timestamp: Utc::now(),
            },
            statistics: Some(summary),
            anomalies: flagged,
            recommendations: report.recommendations.clone(),
            trends: Some(trend_result),
            ai_insights: report,
        })
    }

    /// The defined shape for "no data in the window".
    fn empty_analysis(request: &AnalysisRequest) -> MetricsAnalysis {
        MetricsAnalysis {
            summary: AnalysisSummary {
                total_data_points: 0,
                time_range: request.time_range.clone(),
                service: request.service.clone(),
                metric_name: request.metric_name.clone(),
                anomaly_rate: 0.0,
                analysis_timestamp: Utc::now(),
            },
            statistics: None,
            anomalies: Vec::new(),
            trends: None,
            recommendations: Vec::new(),
            ai_insights: InsightReport {
                summary: "No metrics data available for the specified parameters".to_string(),
                recommendations: Vec::new(),
                risk: None,
                generated_by: GeneratedBy::Fallback,
                fallback_reason: None,
            },
        }
    }
}
