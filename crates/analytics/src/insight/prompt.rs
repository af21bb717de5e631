//! Prompt construction for the metrics insight request.

use std::fmt::Write;

use crate::types::{AnomalyResult, StatisticalSummary, TrendResult};

use super::AnalysisContext;

/// Build the structured analysis prompt.
///
/// Embeds the sample count, time range, two-decimal summary statistics,
/// anomaly counts with the top three flagged points, and the trend
/// classification, then pins the model to a bare-JSON reply.
pub fn build_metrics_prompt(
    summary: &StatisticalSummary,
    trend: &TrendResult,
    anomalies: &AnomalyResult,
    context: &AnalysisContext,
    low_confidence: bool,
) -> String {
    let mut prompt = String::with_capacity(1024);

    let _ = writeln!(
        prompt,
        "Analyze the following infrastructure metrics and anomalies for {}/{}:",
        context.resource_id, context.metric_name
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Metrics Summary:");
    let _ = writeln!(prompt, "- Total data points: {}", anomalies.total_points());
    let _ = writeln!(prompt, "- Time range: {}", context.time_range_label);
    let _ = writeln!(prompt, "- Mean value: {:.2}", summary.mean);
    let _ = writeln!(prompt, "- Median: {:.2}", summary.median);
    let _ = writeln!(prompt, "- Standard deviation: {:.2}", summary.stddev);
    let _ = writeln!(prompt, "- Min/Max: {:.2} / {:.2}", summary.min, summary.max);
    let _ = writeln!(prompt, "- p95/p99: {:.2} / {:.2}", summary.p95, summary.p99);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Anomalies Detected:");
    let _ = writeln!(prompt, "- Anomaly count: {}", anomalies.anomaly_count);
    let _ = writeln!(
        prompt,
        "- Anomaly rate: {:.2}%",
        anomalies.anomaly_rate * 100.0
    );

    let top = anomalies.top_anomalies(3);
    if top.is_empty() {
        let _ = writeln!(prompt, "- Top anomalies: none");
    } else {
        let _ = writeln!(prompt, "- Top anomalies:");
        for point in top {
            let _ = writeln!(
                prompt,
                "  - index {}, at {}, score {:.2}",
                point.index,
                point.timestamp.to_rfc3339(),
                point.score
            );
        }
    }

    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Trends:");
    let _ = writeln!(prompt, "- Overall trend: {}", trend.direction.as_str());
    let _ = writeln!(prompt, "- Volatility: {:.4}", trend.volatility);

    if low_confidence {
        let _ = writeln!(prompt);
        let _ = writeln!(
            prompt,
            "Note: only {} data points are available, below the minimum for reliable anomaly detection. Treat the anomaly findings as low confidence and say so in your summary.",
            anomalies.total_points()
        );
    }

    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Please provide:");
    let _ = writeln!(
        prompt,
        "1. A concise analysis of the metrics patterns and anomalies"
    );
    let _ = writeln!(
        prompt,
        "2. Specific recommendations for optimization or alerting"
    );
    let _ = writeln!(prompt, "3. A risk assessment of the current behavior");
    let _ = writeln!(prompt);
    let _ = write!(
        prompt,
        "Respond with ONLY a valid JSON object with 'summary' (string), 'recommendations' (array of strings), and 'risk' (string) fields, no markdown formatting."
    );

    prompt
}
