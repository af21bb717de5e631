//! Metrics analytics and insight pipeline for Cloud Pulse
//!
//! This crate turns a raw time-series of resource-metric samples into
//! statistical summaries, a trend/volatility classification, per-point
//! anomaly scores, and a natural-language insight report produced by an
//! external completion service with bounded retries and a strict output
//! contract. A small HTTP surface exposes the pipeline to the chat and
//! alerting collaborators.

pub mod agent;
pub mod config;
pub mod detect;
pub mod error;
pub mod history;
pub mod insight;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod stats;
pub mod telemetry;
pub mod trend;
pub mod types;

// Re-export commonly used types
pub use types::{
    AnomalyPoint, AnomalyResult, FallbackReason, GeneratedBy, InsightReport, MetricSample,
    StatisticalSummary, TimeRange, TimeWindow, TrendDirection, TrendResult,
};

pub use config::{
    AnalyticsConfig, CompletionConfig, ConfigError, DetectionConfig, HistoryConfig, ServerConfig,
};

pub use error::{AnalyticsError, DataError, Result};

pub use detect::{
    AnomalyDetector, DetectionError, DetectionMethod, DetectionParams, HttpScorer, ModelScorer,
    ScoreRequest, ScoreResponse, ScoredPoint,
};

pub use insight::{
    AnalysisContext, CompletionClient, CompletionError, FormatError, GeminiClient,
    InsightSynthesizer, RetryPolicy,
};

pub use agent::{AgentEngine, AgentReply, AgentVariant, ChatRole, ChatTurn};

pub use history::{HistoryError, HistoryFetcher, HistoryRequest, HttpHistoryFetcher};

pub use pipeline::{AnalysisPipeline, AnalysisRequest, AnalysisSummary, MetricsAnalysis};

pub use server::{AppState, ApiError};
