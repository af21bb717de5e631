//! Statistics engine
//!
//! Pure summary statistics over one sample sequence. All functions are
//! deterministic for a given input order and perform no I/O; the trend
//! analyzer and the anomaly detector share the helpers below.

use crate::error::DataError;
use crate::types::{MetricSample, StatisticalSummary};

/// Arithmetic mean. Zero for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divide by `n`, not `n - 1`), computed
/// from the mean squared deviation. Zero for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let mean_sq_dev = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    mean_sq_dev.sqrt()
}

/// Index of the `q`-quantile in a sorted sequence of length `n`:
/// `floor(n * q)` clamped to `n - 1`. No interpolation.
pub fn percentile_index(n: usize, q: f64) -> usize {
    debug_assert!(n > 0);
    (((n as f64) * q).floor() as usize).min(n - 1)
}

/// Compute summary statistics over one sample sequence.
///
/// # Errors
///
/// Returns [`DataError::EmptySeries`] when `samples` is empty; every other
/// input produces a summary.
pub fn summarize(samples: &[MetricSample]) -> Result<StatisticalSummary, DataError> {
    if samples.is_empty() {
        return Err(DataError::empty("statistics require at least one sample"));
    }

    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let mut sorted = values.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();

    Ok(StatisticalSummary {
        mean: mean(&values),
        median: sorted[n / 2],
        min: sorted[0],
        max: sorted[n - 1],
        stddev: std_dev(&values),
        p95: sorted[percentile_index(n, 0.95)],
        p99: sorted[percentile_index(n, 0.99)],
    })
}
