//! HTTP surface
//!
//! The endpoints the chat and alerting collaborators consume, plus health
//! and metrics. Handlers hold no per-request state of their own: each
//! request assembles a fresh pipeline from the shared components, so a
//! caller-supplied completion credential only ever affects its own request.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use prometheus_client::registry::Registry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::agent::{AgentEngine, AgentReply, AgentVariant, ChatTurn};
use crate::config::AnalyticsConfig;
use crate::detect::{AnomalyDetector, DetectionMethod, DetectionParams, HttpScorer};
use crate::error::{AnalyticsError, DataError};
use crate::history::{HistoryFetcher, HttpHistoryFetcher};
use crate::insight::{CompletionClient, GeminiClient, InsightSynthesizer, RetryPolicy};
use crate::metrics::{self, ServiceMetrics};
use crate::pipeline::{AnalysisPipeline, AnalysisRequest, MetricsAnalysis};
use crate::types::{AnomalyResult, MetricSample};

/// Header a proxy can use to supply the completion credential per request.
const API_KEY_HEADER: &str = "x-gemini-api-key";

/// Shared application state. Everything is an `Arc`; per-request objects
/// (synthesizer, pipeline) are assembled in the handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<AnalyticsConfig>,
    fetcher: Arc<dyn HistoryFetcher>,
    detector: Arc<AnomalyDetector>,
    metrics: Arc<ServiceMetrics>,
    registry: Arc<Registry>,
}

impl AppState {
    /// Production wiring from configuration.
    pub fn new(config: AnalyticsConfig) -> Self {
        let fetcher: Arc<dyn HistoryFetcher> = Arc::new(HttpHistoryFetcher::new(&config.history));

        let mut detector = AnomalyDetector::new(config.detection.clone());
        if let Some(endpoint) = &config.detection.worker_endpoint {
            detector = detector.with_scorer(Arc::new(HttpScorer::new(
                endpoint.clone(),
                config.detection.worker_timeout,
            )));
        }

        Self::with_parts(config, fetcher, Arc::new(detector))
    }

    /// Wiring with injectable collaborators; used by tests.
    pub fn with_parts(
        config: AnalyticsConfig,
        fetcher: Arc<dyn HistoryFetcher>,
        detector: Arc<AnomalyDetector>,
    ) -> Self {
        let (metrics, registry) = ServiceMetrics::new();
        Self {
            config: Arc::new(config),
            fetcher,
            detector,
            metrics: Arc::new(metrics),
            registry: Arc::new(registry),
        }
    }

    /// Resolve the completion credential for this request: the header wins,
    /// the environment-configured key is the fallback, absence means the
    /// synthesizer skips the service entirely.
    fn completion_client(&self, headers: &HeaderMap) -> Option<Arc<dyn CompletionClient>> {
        let header_key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        header_key
            .or_else(|| self.config.completion.api_key.clone())
            .map(|key| {
                Arc::new(GeminiClient::new(&self.config.completion, key))
                    as Arc<dyn CompletionClient>
            })
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.config.completion.backoff_step,
            self.config.completion.max_retries,
        )
    }

    fn synthesizer(&self, headers: &HeaderMap) -> InsightSynthesizer {
        InsightSynthesizer::new(
            self.completion_client(headers),
            self.retry_policy(),
            self.config.detection.min_history,
        )
    }

    fn agent_engine(&self, headers: &HeaderMap) -> AgentEngine {
        AgentEngine::new(
            self.completion_client(headers),
            self.retry_policy(),
            Some(Arc::clone(&self.fetcher)),
        )
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/detect-anomalies", post(detect_anomalies))
        .route("/analyze-metrics", post(analyze_metrics))
        .route("/agent", post(run_agent))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

/// Serve until the listener dies.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.server.bind;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "analytics service listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// === Request/response shapes ===

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    #[serde(default)]
    pub metrics_data: Vec<MetricSample>,

    #[serde(default)]
    pub method: Option<DetectionMethod>,

    #[serde(default)]
    pub thresholds: Option<DetectionParams>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub success: bool,
    pub results: AnomalyResult,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub analysis: MetricsAnalysis,
}

#[derive(Debug, Deserialize)]
pub struct AgentHttpRequest {
    #[serde(default)]
    pub prompt: String,

    pub agent: AgentVariant,

    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

/// Error response body: `{ error, details, timestamp }` with the mapped
/// status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    details: String,
}

impl ApiError {
    fn bad_request(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.into(),
            details: details.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        Self {
            status: StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            error: err.label().to_string(),
            details: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.error,
            "details": self.details,
            "timestamp": Utc::now(),
        });
        (self.status, Json(body)).into_response()
    }
}

// === Handlers ===

/// `POST /detect-anomalies`
async fn detect_anomalies(
    State(state): State<AppState>,
    Json(body): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    if body.metrics_data.is_empty() {
        state.metrics.record_request("detect-anomalies", false);
        return Err(AnalyticsError::from(DataError::empty(
            "metrics_data is required and must be a non-empty array",
        ))
        .into());
    }

    let method = body.method.unwrap_or_default();
    let params = body.thresholds.unwrap_or_default();

    let results = state
        .detector
        .detect(&body.metrics_data, method, &params)
        .await
        .map_err(|err| {
            error!(error = %err, "anomaly detection failed");
            state.metrics.record_request("detect-anomalies", false);
            ApiError::from(err)
        })?;

    state.metrics.record_request("detect-anomalies", true);
    state.metrics.record_detection(
        match method {
            DetectionMethod::Statistical => "statistical",
            DetectionMethod::ExternalModel => "external_model",
        },
        results.anomaly_count,
    );

    Ok(Json(DetectResponse {
        success: true,
        results,
        timestamp: Utc::now(),
    }))
}

/// `POST /analyze-metrics`
async fn analyze_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let pipeline = AnalysisPipeline::new(
        Arc::clone(&state.fetcher),
        Arc::clone(&state.detector),
        state.synthesizer(&headers),
    );

    let analysis = pipeline.run(&request).await.map_err(|err| {
        error!(error = %err, "metrics analysis failed");
        state.metrics.record_request("analyze-metrics", false);
        ApiError::from(err)
    })?;

    state.metrics.record_request("analyze-metrics", true);
    if let Some(reason) = analysis.ai_insights.fallback_reason {
        state
            .metrics
            .record_fallback(match reason {
                crate::types::FallbackReason::Unconfigured => "unconfigured",
                crate::types::FallbackReason::ServiceError => "service_error",
                crate::types::FallbackReason::InvalidFormat => "invalid_format",
            });
    }

    Ok(Json(AnalyzeResponse {
        success: true,
        analysis,
    }))
}

/// `POST /agent`
///
/// The body is parsed by hand so missing prompts and unknown agent variants
/// come back as the uniform 400 error shape rather than a framework
/// rejection.
async fn run_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<AgentReply>, ApiError> {
    let request: AgentHttpRequest = serde_json::from_value(body).map_err(|e| {
        state.metrics.record_request("agent", false);
        ApiError::bad_request("invalid agent request", e.to_string())
    })?;

    if request.prompt.trim().is_empty() {
        state.metrics.record_request("agent", false);
        return Err(ApiError::bad_request(
            "invalid agent request",
            "prompt is required",
        ));
    }

    let engine = state.agent_engine(&headers);
    let reply = engine
        .run(&request.prompt, &request.agent, &request.history)
        .await;

    state.metrics.record_request("agent", !reply.error);
    Ok(Json(reply))
}

/// `GET /health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /metrics`
async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match metrics::render(&state.registry) {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::history::{HistoryError, HistoryRequest};
    use async_trait::async_trait;
    use chrono::Duration;

    struct FixedFetcher {
        samples: Vec<MetricSample>,
    }

    #[async_trait]
    impl HistoryFetcher for FixedFetcher {
        async fn fetch(&self, _request: &HistoryRequest) -> Result<Vec<MetricSample>, HistoryError> {
            Ok(self.samples.clone())
        }
    }

    fn spiky_samples() -> Vec<MetricSample> {
        let base = Utc::now() - Duration::hours(1);
        let mut values = vec![10.0; 4];
        values.push(100.0);
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                MetricSample::new("i-0abc123", "CPUUtilization", base + Duration::minutes(i as i64), v)
            })
            .collect()
    }

    fn state_with_samples(samples: Vec<MetricSample>) -> AppState {
        AppState::with_parts(
            AnalyticsConfig::default(),
            Arc::new(FixedFetcher { samples }),
            Arc::new(AnomalyDetector::new(DetectionConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_detect_anomalies_happy_path() {
        let state = state_with_samples(Vec::new());
        let body = DetectRequest {
            metrics_data: spiky_samples(),
            method: None,
            thresholds: None,
        };

        let response = detect_anomalies(State(state), Json(body)).await.unwrap();
        assert!(response.0.success);
        assert_eq!(response.0.results.anomaly_count, 1);
        assert!((response.0.results.anomaly_rate - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_detect_anomalies_empty_body_is_400() {
        let state = state_with_samples(Vec::new());
        let body = DetectRequest {
            metrics_data: Vec::new(),
            method: None,
            thresholds: None,
        };

        let err = detect_anomalies(State(state), Json(body)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_detect_anomalies_external_without_scorer_is_500() {
        let state = state_with_samples(Vec::new());
        let body = DetectRequest {
            metrics_data: spiky_samples(),
            method: Some(DetectionMethod::ExternalModel),
            thresholds: None,
        };

        let err = detect_anomalies(State(state), Json(body)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_analyze_metrics_full_response() {
        let state = state_with_samples(spiky_samples());
        let request = AnalysisRequest {
            service: "ec2".to_string(),
            resource_id: "i-0abc123".to_string(),
            metric_name: "CPUUtilization".to_string(),
            time_range: "24h".to_string(),
        };

        let response = analyze_metrics(State(state), HeaderMap::new(), Json(request))
            .await
            .unwrap();

        assert!(response.0.success);
        let analysis = &response.0.analysis;
        assert_eq!(analysis.summary.total_data_points, 5);
        assert_eq!(analysis.anomalies.len(), 1);
        // No credential anywhere: the insight is an unconfigured fallback.
        assert_eq!(
            analysis.ai_insights.fallback_reason,
            Some(crate::types::FallbackReason::Unconfigured)
        );
    }

    #[tokio::test]
    async fn test_analyze_metrics_no_data_is_success() {
        let state = state_with_samples(Vec::new());
        let request = AnalysisRequest {
            service: "ec2".to_string(),
            resource_id: "i-0abc123".to_string(),
            metric_name: "CPUUtilization".to_string(),
            time_range: "24h".to_string(),
        };

        let response = analyze_metrics(State(state), HeaderMap::new(), Json(request))
            .await
            .unwrap();
        assert!(response.0.success);
        assert_eq!(response.0.analysis.summary.total_data_points, 0);
        assert!(response.0.analysis.anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_agent_missing_prompt_is_400() {
        let state = state_with_samples(Vec::new());
        let body = json!({ "agent": { "type": "knowledge" } });

        let err = run_agent(State(state), HeaderMap::new(), Json(body))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_agent_unknown_variant_is_400() {
        let state = state_with_samples(Vec::new());
        let body = json!({ "prompt": "hi", "agent": { "type": "pirate" } });

        let err = run_agent(State(state), HeaderMap::new(), Json(body))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_agent_unconfigured_returns_error_reply_not_http_error() {
        let state = state_with_samples(Vec::new());
        let body = json!({ "prompt": "what is my cpu doing?", "agent": { "type": "knowledge" } });

        let response = run_agent(State(state), HeaderMap::new(), Json(body))
            .await
            .unwrap();
        assert!(response.0.error);
        assert_eq!(response.0.summary, "AI Service Not Configured");
    }

    #[tokio::test]
    async fn test_health() {
        let response = health().await;
        assert_eq!(response.0["status"], "ok");
    }

    #[test]
    fn test_error_body_shape() {
        let err: ApiError = AnalyticsError::from(DataError::empty("metrics_data")).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error, "invalid input");
        assert!(err.details.contains("metrics_data"));
    }
}
