//! Descriptive and robust statistics helpers.
//!
//! All helpers ignore nothing implicitly: callers filter out missing values
//! before passing slices in. Empty input yields `None`.

use std::cmp::Ordering;

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// `100 * numerator / denominator`, or `None` when the denominator is not
/// positive or the result is not finite.
pub fn percent(numerator: f64, denominator: f64) -> Option<f64> {
    if !(denominator > 0.0) {
        return None;
    }
    let value = 100.0 * numerator / denominator;
    value.is_finite().then_some(value)
}

pub fn sort_values(values: &mut [f64]) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sort_values(&mut sorted);
    quantile_sorted(&sorted, 0.5)
}

/// Quantile of already-sorted values, interpolating linearly between the
/// two nearest order statistics (position `(n - 1) * q`).
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let position = (sorted.len() - 1) as f64 * q;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// First and third quartiles.
pub fn quartiles(values: &[f64]) -> Option<(f64, f64)> {
    let mut sorted = values.to_vec();
    sort_values(&mut sorted);
    Some((quantile_sorted(&sorted, 0.25)?, quantile_sorted(&sorted, 0.75)?))
}

/// Median absolute deviation around `center`.
pub fn median_abs_deviation(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Residuals of an ordinary least-squares line fitted against position.
pub fn linear_residuals(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = y_mean - slope * x_mean;

    values
        .iter()
        .enumerate()
        .map(|(i, y)| y - (intercept + slope * i as f64))
        .collect()
}

/// Summary statistics for one metric across channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl MetricSummary {
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        values.retain(|v| v.is_finite());
        if values.is_empty() {
            return None;
        }

        sort_values(&mut values);

        let count = values.len();
        let sum: f64 = values.iter().sum();
        let mean = sum / count as f64;

        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let std_dev = variance.sqrt();

        let min = values[0];
        let max = values[count - 1];
        let median = quantile_sorted(&values, 0.5)?;

        Some(Self {
            count,
            mean,
            std_dev,
            min,
            max,
            median,
        })
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_summary() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let summary = MetricSummary::from_values(values).unwrap();

        assert_eq!(summary.count, 5);
        assert_eq!(summary.mean, 3.0);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(summary.median, 3.0);
        assert_eq!(summary.range(), 4.0);
    }

    #[test]
    fn test_metric_summary_skips_non_finite() {
        let summary = MetricSummary::from_values(vec![f64::NAN, 2.0, f64::INFINITY]).unwrap();
        assert_eq!(summary.count, 1);
        assert!(MetricSummary::from_values(vec![f64::NAN]).is_none());
    }

    #[test]
    fn test_quantile_interpolates() {
        let sorted = [150.0, 298.0, 300.0, 301.0, 302.0];
        assert_eq!(quantile_sorted(&sorted, 0.25), Some(298.0));
        assert_eq!(quantile_sorted(&sorted, 0.75), Some(301.0));

        let even = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&even, 0.25), Some(1.75));
        assert_eq!(quantile_sorted(&even, 0.5), Some(2.5));
        assert_eq!(quantile_sorted(&[], 0.5), None);
    }

    #[test]
    fn test_median_and_mad() {
        let values = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert_eq!(median(&values), Some(3.0));
        // deviations: 2, 1, 0, 1, 97
        assert_eq!(median_abs_deviation(&values, 3.0), Some(1.0));
    }

    #[test]
    fn test_linear_residuals_remove_trend() {
        let values = [1.0, 3.0, 5.0, 7.0, 9.0];
        for r in linear_residuals(&values) {
            assert!(r.abs() < 1e-12);
        }
        assert_eq!(linear_residuals(&[4.0]), vec![0.0]);
    }

    #[test]
    fn test_percent_guards_denominator() {
        assert_eq!(percent(50.0, 200.0), Some(25.0));
        assert_eq!(percent(50.0, 0.0), None);
        assert_eq!(percent(50.0, -1.0), None);
        assert_eq!(percent(50.0, f64::NAN), None);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(83.3333, 1), 83.3);
        assert_eq!(round_to(3.14159, 2), 3.14);
    }
}
