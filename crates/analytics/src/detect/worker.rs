//! Out-of-process model scorer protocol
//!
//! The heavyweight anomaly model (an isolation forest in production) runs
//! outside this process. This module owns the protocol only: serialize the
//! full sample array, send it to the worker, await a bounded-time reply,
//! deserialize the per-point scores. The transport is a trait so tests can
//! substitute an in-memory worker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::DetectionError;
use crate::types::MetricSample;

/// Request sent to the scoring worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    /// Scoring method the worker should apply.
    pub method: String,

    /// The full sample array, in input order.
    pub metrics_data: Vec<MetricSample>,
}

/// One scored point. Indices refer to positions in the request's sample
/// array; the worker may omit points it considers ordinary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub index: usize,
    pub score: f64,
}

/// Reply from the scoring worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub scores: Vec<ScoredPoint>,
}

/// A scoring worker the detector can delegate to.
#[async_trait]
pub trait ModelScorer: Send + Sync {
    /// Worker name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Score the given samples.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError`] when the worker cannot be reached, dies
    /// mid-request, or replies with something undecodable. Implementations
    /// must fail loudly rather than return an empty score list for a
    /// failed run.
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreResponse, DetectionError>;
}

/// HTTP scoring worker.
///
/// POSTs the request as JSON to the configured endpoint and decodes the
/// reply. The request timeout here is a transport-level bound; the detector
/// additionally enforces its own `worker_timeout` around the whole call.
pub struct HttpScorer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpScorer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ModelScorer for HttpScorer {
    fn name(&self) -> &str {
        "http"
    }

    async fn score(&self, request: &ScoreRequest) -> Result<ScoreResponse, DetectionError> {
        debug!(
            endpoint = %self.endpoint,
            points = request.metrics_data.len(),
            "invoking external scorer"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DetectionError::Timeout {
                        message: format!("scorer at {} timed out", self.endpoint),
                    }
                } else {
                    DetectionError::Worker {
                        message: format!("scorer request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectionError::Worker {
                message: format!("scorer replied with status {status}"),
            });
        }

        response
            .json::<ScoreResponse>()
            .await
            .map_err(|e| DetectionError::BadOutput {
                message: format!("undecodable scorer reply: {e}"),
            })
    }
}
