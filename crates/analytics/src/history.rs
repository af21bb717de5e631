//! Historical context fetcher boundary
//!
//! The pipeline does not own sample persistence; it asks an external
//! collaborator for the raw series. Only the interface lives here: a
//! request shape, a trait, and the HTTP implementation that talks to the
//! metrics-history service.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::HistoryConfig;
use crate::types::{MetricSample, TimeWindow};

/// Failure to retrieve historical samples.
#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error("metrics history request failed: {message}")]
    Request { message: String },

    #[error("metrics history returned an undecodable payload: {message}")]
    BadPayload { message: String },
}

/// One fetch: a resource/metric pair over a time window.
#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub resource_id: String,
    pub metric_name: String,
    pub window: TimeWindow,
}

/// Source of historical metric samples.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Fetch all samples for the request, oldest first. An empty result is
    /// valid and means no data exists for the window.
    async fn fetch(&self, request: &HistoryRequest) -> Result<Vec<MetricSample>, HistoryError>;
}

#[derive(Debug, Deserialize)]
struct HistoryPayload {
    #[serde(default)]
    metrics: Vec<MetricSample>,
}

/// HTTP implementation against the metrics-history collaborator.
pub struct HttpHistoryFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHistoryFetcher {
    pub fn new(config: &HistoryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(&HistoryConfig {
            base_url: base_url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl HistoryFetcher for HttpHistoryFetcher {
    async fn fetch(&self, request: &HistoryRequest) -> Result<Vec<MetricSample>, HistoryError> {
        let url = format!("{}/api/metrics-history/summary", self.base_url);
        debug!(
            resource = %request.resource_id,
            metric = %request.metric_name,
            start = %request.window.start,
            end = %request.window.end,
            "fetching historical samples"
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("resourceId", request.resource_id.as_str()),
                ("metricName", request.metric_name.as_str()),
                ("startTime", &request.window.start.to_rfc3339()),
                ("endTime", &request.window.end.to_rfc3339()),
            ])
            .send()
            .await
            .map_err(|e| HistoryError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Request {
                message: format!("metrics history service returned {status}"),
            });
        }

        let payload: HistoryPayload =
            response.json().await.map_err(|e| HistoryError::BadPayload {
                message: e.to_string(),
            })?;

        let mut samples = payload.metrics;
        samples.sort_by_key(|s| s.timestamp);
        debug!(points = samples.len(), "historical samples fetched");
        Ok(samples)
    }
}
