//! Prometheus metrics for the analytics service
//!
//! Counter names follow Prometheus conventions (`*_total` for counters).
//! Handles are cheap clones; the registry itself lives in the shared app
//! state and is rendered by the `/metrics` endpoint.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Labels for per-endpoint request accounting.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub endpoint: String,
    pub result: String,
}

/// Labels for detection-run accounting.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MethodLabels {
    pub method: String,
}

/// Labels for fallback-report accounting.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

/// All metrics exported by the service.
pub struct ServiceMetrics {
    /// Requests handled, labeled by endpoint and result (ok/error).
    pub requests_total: Family<RequestLabels, Counter>,

    /// Detection runs, labeled by scoring method.
    pub detections_total: Family<MethodLabels, Counter>,

    /// Points flagged anomalous across all detection runs.
    pub anomalies_found_total: Counter,

    /// Insight reports that fell back to deterministic text, by reason.
    pub fallback_reports_total: Family<ReasonLabels, Counter>,
}

impl ServiceMetrics {
    /// Create the metrics and register them into a fresh registry.
    pub fn new() -> (Self, Registry) {
        let mut registry = Registry::with_prefix("analytics");

        let metrics = Self {
            requests_total: Family::default(),
            detections_total: Family::default(),
            anomalies_found_total: Counter::default(),
            fallback_reports_total: Family::default(),
        };

        registry.register(
            "requests",
            "Requests handled, by endpoint and result",
            metrics.requests_total.clone(),
        );
        registry.register(
            "detections",
            "Anomaly detection runs, by method",
            metrics.detections_total.clone(),
        );
        registry.register(
            "anomalies_found",
            "Points flagged anomalous across all detection runs",
            metrics.anomalies_found_total.clone(),
        );
        registry.register(
            "fallback_reports",
            "Insight reports that fell back to deterministic text, by reason",
            metrics.fallback_reports_total.clone(),
        );

        (metrics, registry)
    }

    pub fn record_request(&self, endpoint: &str, ok: bool) {
        self.requests_total
            .get_or_create(&RequestLabels {
                endpoint: endpoint.to_string(),
                result: if ok { "ok" } else { "error" }.to_string(),
            })
            .inc();
    }

    pub fn record_detection(&self, method: &str, anomaly_count: usize) {
        self.detections_total
            .get_or_create(&MethodLabels {
                method: method.to_string(),
            })
            .inc();
        self.anomalies_found_total.inc_by(anomaly_count as u64);
    }

    pub fn record_fallback(&self, reason: &str) {
        self.fallback_reports_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }
}

/// Render a registry in the OpenMetrics text exposition format.
pub fn render(registry: &Registry) -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    encode(&mut buffer, registry)?;
    Ok(buffer)
}
