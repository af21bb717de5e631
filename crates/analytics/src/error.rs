//! Request-boundary error taxonomy
//!
//! Only `DataError` and `DetectionError` (and fetch failures) ever reach the
//! HTTP boundary; every completion-service failure mode is absorbed into a
//! fallback `InsightReport` inside the synthesizer and never appears here.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::detect::DetectionError;
use crate::history::HistoryError;

/// Result type for operations that can fail at the request boundary.
pub type Result<T, E = AnalyticsError> = std::result::Result<T, E>;

/// Invalid input data; the caller's fault, never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    /// An empty sample sequence where at least one point is required.
    #[error("empty sample sequence: {context}")]
    EmptySeries { context: String },

    /// An analysis window with inverted bounds.
    #[error("invalid time window: start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl DataError {
    pub fn empty(context: impl Into<String>) -> Self {
        DataError::EmptySeries {
            context: context.into(),
        }
    }
}

/// Top-level error for one analysis request.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

impl AnalyticsError {
    /// HTTP-equivalent status for this failure.
    pub fn status(&self) -> u16 {
        match self {
            AnalyticsError::Data(_) => 400,
            AnalyticsError::Detection(_) => 500,
            AnalyticsError::History(_) => 502,
        }
    }

    /// Short machine-readable label used in the error response body.
    pub fn label(&self) -> &'static str {
        match self {
            AnalyticsError::Data(_) => "invalid input",
            AnalyticsError::Detection(_) => "anomaly detection failed",
            AnalyticsError::History(_) => "metrics history unavailable",
        }
    }
}
