//! Completion-service client
//!
//! One trait at the seam so the synthesizer can be exercised against a
//! scripted client, and a production implementation targeting the
//! `generateContent` REST shape. Failures are classified here: HTTP 503,
//! "overloaded" replies, and transport errors are transient and eligible
//! for retry; everything else is fatal and aborts immediately.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CompletionConfig;

/// Completion failure, pre-classified for the retry policy.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// Worth retrying: the service is briefly unavailable.
    #[error("transient completion failure: {0}")]
    Transient(String),

    /// Not worth retrying: bad request, auth failure, malformed payload.
    #[error("completion failure: {0}")]
    Fatal(String),
}

impl CompletionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CompletionError::Transient(_))
    }
}

/// A text-completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send one prompt and return the raw completion text.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &CompletionConfig, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.attempt_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.endpoint, self.model, self.api_key
        )
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        debug!(model = %self.model, prompt_len = prompt.len(), "sending completion request");

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        let response = self
            .client
            .post(self.url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    CompletionError::Transient(format!("completion request failed: {e}"))
                } else {
                    CompletionError::Fatal(format!("completion request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "completion service returned an error");
            if status.as_u16() == 503 || text.contains("overloaded") {
                return Err(CompletionError::Transient(format!(
                    "completion service unavailable ({status})"
                )));
            }
            return Err(CompletionError::Fatal(format!(
                "completion service returned {status}: {}",
                truncate(&text, 200)
            )));
        }

        let payload: serde_json::Value = response.json().await.map_err(|e| {
            CompletionError::Fatal(format!("undecodable completion payload: {e}"))
        })?;

        payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                CompletionError::Fatal("completion payload missing candidate text".to_string())
            })
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
