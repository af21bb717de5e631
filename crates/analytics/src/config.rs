//! Configuration for the analytics service
//!
//! Every tunable the pipeline exposes lives here: detection thresholds,
//! completion-service credentials and retry schedule, the history
//! collaborator endpoint, and the HTTP bind address. Defaults match the
//! production deployment; `from_env` overlays environment variables on top.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error raised by [`AnalyticsConfig::validate`].
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the anomaly detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// A point is a spike when `value > mean * spike_factor`.
    pub spike_factor: f64,

    /// Spikes are significant when they exceed this fraction of all points.
    pub significant_fraction: f64,

    /// Default score cutoff for `is_anomaly`.
    pub threshold: f64,

    /// Below this many samples, results are annotated as low confidence.
    pub min_history: usize,

    /// Endpoint of the out-of-process model scorer, when deployed.
    pub worker_endpoint: Option<String>,

    /// Bound on one scorer invocation.
    pub worker_timeout: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            spike_factor: 1.5,
            significant_fraction: 0.1,
            threshold: 0.8,
            min_history: 11,
            worker_endpoint: None,
            worker_timeout: Duration::from_secs(10),
        }
    }
}

impl DetectionConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_spike_factor(mut self, factor: f64) -> Self {
        self.spike_factor = factor;
        self
    }

    pub fn with_worker_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.worker_endpoint = Some(endpoint.into());
        self
    }
}

/// Completion-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Credential for the completion service. `None` means the service is
    /// unconfigured and the synthesizer falls back without calling out.
    pub api_key: Option<String>,

    /// Base endpoint of the `generateContent` API.
    pub endpoint: String,

    /// Model identifier appended to the endpoint.
    pub model: String,

    /// Bound on a single completion attempt.
    pub attempt_timeout: Duration,

    /// Linear backoff step; retry `i` (zero-based) waits `(i + 1) * step`.
    pub backoff_step: Duration,

    /// Retries after the initial attempt.
    pub max_retries: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            model: "gemini-2.0-flash".to_string(),
            attempt_timeout: Duration::from_secs(30),
            backoff_step: Duration::from_secs(2),
            max_retries: 3,
        }
    }
}

/// Historical-context collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Base URL of the metrics-history service.
    pub base_url: String,

    /// Bound on one fetch.
    pub timeout: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://node-service:3000".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], 9000).into(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub detection: DetectionConfig,
    pub completion: CompletionConfig,
    pub history: HistoryConfig,
    pub server: ServerConfig,
}

impl AnalyticsConfig {
    /// Defaults overlaid with environment variables:
    /// `GEMINI_API_KEY`, `COMPLETION_MODEL`, `HISTORY_BASE_URL`,
    /// `SCORER_ENDPOINT`, `ANALYTICS_BIND`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                config.completion.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("COMPLETION_MODEL") {
            if !model.is_empty() {
                config.completion.model = model;
            }
        }
        if let Ok(url) = std::env::var("HISTORY_BASE_URL") {
            if !url.is_empty() {
                config.history.base_url = url;
            }
        }
        if let Ok(endpoint) = std::env::var("SCORER_ENDPOINT") {
            if !endpoint.is_empty() {
                config.detection.worker_endpoint = Some(endpoint);
            }
        }
        if let Ok(bind) = std::env::var("ANALYTICS_BIND") {
            if let Ok(addr) = bind.parse() {
                config.server.bind = addr;
            }
        }

        config
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return Err(ConfigError::Invalid(format!(
                "detection.threshold must be within [0, 1], got {}",
                self.detection.threshold
            )));
        }
        if self.detection.spike_factor <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "detection.spike_factor must be positive, got {}",
                self.detection.spike_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.detection.significant_fraction) {
            return Err(ConfigError::Invalid(format!(
                "detection.significant_fraction must be within [0, 1], got {}",
                self.detection.significant_fraction
            )));
        }
        if self.detection.worker_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "detection.worker_timeout must be non-zero".to_string(),
            ));
        }
        if self.completion.attempt_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "completion.attempt_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AnalyticsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_detection_tunables() {
        let detection = DetectionConfig::default();
        assert_eq!(detection.spike_factor, 1.5);
        assert_eq!(detection.significant_fraction, 0.1);
        assert_eq!(detection.threshold, 0.8);
        assert_eq!(detection.min_history, 11);
        assert_eq!(detection.worker_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = AnalyticsConfig::default();
        config.detection.threshold = 1.2;
        assert!(config.validate().is_err());

        config.detection.threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_threshold_clamps() {
        let detection = DetectionConfig::default().with_threshold(1.7);
        assert_eq!(detection.threshold, 1.0);
    }

    #[test]
    fn test_completion_backoff_schedule_defaults() {
        let completion = CompletionConfig::default();
        assert_eq!(completion.backoff_step, Duration::from_secs(2));
        assert_eq!(completion.max_retries, 3);
        assert!(completion.api_key.is_none());
    }
}
