//! Trend & volatility analyzer
//!
//! Classifies whether a series is rising, falling, or flat by comparing a
//! short trailing moving average against a longer baseline, and measures
//! volatility as the dispersion of period-over-period relative returns.
//! Pure; callers are responsible for feeding samples sorted ascending by
//! timestamp.

use crate::stats::{mean, std_dev};
use crate::types::{MetricSample, TrendDirection, TrendResult};

/// Short trailing window: `min(12, n / 4)`, at least 1.
fn short_window(n: usize) -> usize {
    (n / 4).min(12).max(1)
}

/// Long trailing window: `min(24, n / 2)`, at least 1.
fn long_window(n: usize) -> usize {
    (n / 2).min(24).max(1)
}

/// Simple trailing moving average; `out[0]` corresponds to input index
/// `window - 1`, so the result has `n - window + 1` entries.
fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if values.len() < window || window == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(values.len() - window + 1);
    let mut sum: f64 = values[..window].iter().sum();
    out.push(sum / window as f64);

    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out.push(sum / window as f64);
    }

    out
}

/// Population standard deviation of relative returns
/// `(v[i] - v[i-1]) / v[i-1]`, skipping steps where the previous value is
/// zero.
fn volatility(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    if returns.is_empty() {
        return 0.0;
    }

    std_dev(&returns)
}

/// Analyze the trend of a sample sequence.
///
/// Fewer than two samples is not an error: the result is `Stable` with
/// empty moving averages and zero volatility.
///
/// Direction compares the last short-window average against the last
/// long-window average; the "rapidly" refinement additionally tests the
/// short average against the overall mean of the series, so a short average
/// that has pulled above both the baseline and the mean reads as a rapid
/// rise (and symmetrically for falls).
pub fn analyze_trend(samples: &[MetricSample]) -> TrendResult {
    if samples.len() < 2 {
        return TrendResult::stable();
    }

    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let n = values.len();

    let short_ma = moving_average(&values, short_window(n));
    let long_ma = moving_average(&values, long_window(n));

    let direction = match (short_ma.last(), long_ma.last()) {
        (Some(&short_last), Some(&long_last)) => {
            let overall = mean(&values);
            if short_last > long_last {
                if short_last > overall {
                    TrendDirection::IncreasingRapidly
                } else {
                    TrendDirection::Increasing
                }
            } else if short_last < long_last {
                if short_last < overall {
                    TrendDirection::DecreasingRapidly
                } else {
                    TrendDirection::Decreasing
                }
            } else {
                TrendDirection::Stable
            }
        }
        _ => TrendDirection::Stable,
    };

    TrendResult {
        direction,
        short_ma,
        long_ma,
        volatility: volatility(&values),
    }
}
