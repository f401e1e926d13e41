//! PCA-centroid reference selection.
//!
//! Candidates are described by a small feature matrix, standardized, and
//! projected onto the leading principal components. The candidate closest to
//! the projected centroid is the most typical channel in the batch.

use nalgebra::{DMatrix, SymmetricEigen};
use tracing::trace;

use crate::config::PcaConfig;
use crate::metrics::stats::{mean, median};
use crate::types::{ChannelSummary, ReferenceMethod, ScalarMetric};

use super::MethodPick;

/// Candidate-by-feature matrix with missing values imputed by the column
/// median. Features no candidate has are dropped.
pub fn feature_matrix(
    candidates: &[&ChannelSummary],
    features: &[ScalarMetric],
) -> (Vec<ScalarMetric>, DMatrix<f64>) {
    let mut used = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();

    for &feature in features {
        let raw: Vec<Option<f64>> = candidates.iter().map(|c| c.metric(feature)).collect();
        let present: Vec<f64> = raw.iter().flatten().copied().collect();
        let Some(fill) = median(&present) else {
            continue;
        };
        used.push(feature);
        columns.push(raw.into_iter().map(|v| v.unwrap_or(fill)).collect());
    }

    let matrix = DMatrix::from_fn(candidates.len(), columns.len(), |r, c| columns[c][r]);
    (used, matrix)
}

/// Standardize each column in place (population standard deviation).
/// Constant columns become zero.
pub fn standardize(matrix: &mut DMatrix<f64>) {
    for mut column in matrix.column_iter_mut() {
        let values: Vec<f64> = column.iter().copied().collect();
        let Some(mu) = mean(&values) else {
            continue;
        };
        let variance = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
        let sd = variance.sqrt();
        for v in column.iter_mut() {
            *v = if sd > 0.0 { (*v - mu) / sd } else { 0.0 };
        }
    }
}

/// Pick the candidate nearest the centroid in principal-component space.
pub fn nearest_to_centroid(
    candidates: &[&ChannelSummary],
    config: &PcaConfig,
) -> Option<MethodPick> {
    if candidates.len() < config.min_samples {
        return None;
    }

    let (used, mut matrix) = feature_matrix(candidates, &config.features);
    if used.len() < config.min_features {
        trace!(usable = used.len(), "Too few PCA features");
        return None;
    }

    standardize(&mut matrix);

    let n = matrix.nrows() as f64;
    let covariance = matrix.transpose() * &matrix / (n - 1.0);
    let eigen = SymmetricEigen::new(covariance);

    let mut order: Vec<usize> = (0..eigen.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let k = config.n_components.min(order.len());
    let components = DMatrix::from_fn(matrix.ncols(), k, |r, c| eigen.eigenvectors[(r, order[c])]);

    let projected = &matrix * components;
    let centroid = projected.row_mean();

    let mut best: Option<MethodPick> = None;
    for (index, row) in projected.row_iter().enumerate() {
        let distance = row
            .iter()
            .zip(centroid.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        if !distance.is_finite() {
            continue;
        }
        if best.map_or(true, |b| distance < b.score) {
            best = Some(MethodPick {
                method: ReferenceMethod::Pca,
                index,
                score: distance,
            });
        }
    }

    trace!(
        features = ?used,
        components = k,
        pick = ?best.map(|b| b.index),
        "PCA scoring complete"
    );
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::channel;

    fn config() -> PcaConfig {
        PcaConfig {
            features: vec![
                ScalarMetric::FirstDischarge,
                ScalarMetric::FirstVoltage,
                ScalarMetric::FirstEfficiency,
            ],
            ..PcaConfig::default()
        }
    }

    fn candidates() -> Vec<ChannelSummary> {
        let rows = [
            (290.0, 3.68, 90.5),
            (300.0, 3.70, 92.0),
            (310.0, 3.72, 93.5),
            (301.0, 3.71, 92.1),
            (296.0, 3.69, 91.2),
        ];
        rows.iter()
            .enumerate()
            .map(|(i, (d, v, e))| {
                let mut c = channel(&format!("{}-1", i + 1), *d);
                c.first.voltage = Some(*v);
                c.first.efficiency = Some(*e);
                c
            })
            .collect()
    }

    #[test]
    fn test_picks_typical_channel() {
        let channels = candidates();
        let refs: Vec<&ChannelSummary> = channels.iter().collect();
        let pick = nearest_to_centroid(&refs, &config()).unwrap();
        assert_eq!(pick.method, ReferenceMethod::Pca);
        assert_eq!(pick.index, 1);
    }

    #[test]
    fn test_too_few_samples() {
        let channels = candidates();
        let refs: Vec<&ChannelSummary> = channels.iter().take(2).collect();
        assert!(nearest_to_centroid(&refs, &config()).is_none());
    }

    #[test]
    fn test_too_few_features() {
        let mut channels = candidates();
        for c in &mut channels {
            c.first.voltage = None;
            c.first.efficiency = None;
        }
        let refs: Vec<&ChannelSummary> = channels.iter().collect();
        assert!(nearest_to_centroid(&refs, &config()).is_none());
    }

    #[test]
    fn test_missing_values_are_imputed() {
        let mut channels = candidates();
        channels[0].first.voltage = None;
        let refs: Vec<&ChannelSummary> = channels.iter().collect();

        let (used, matrix) = feature_matrix(&refs, &config().features);
        assert_eq!(used.len(), 3);
        // median of the remaining voltages
        assert!((matrix[(0, 1)] - 3.705).abs() < 1e-9);
    }

    #[test]
    fn test_constant_column_standardizes_to_zero() {
        let mut m = DMatrix::from_row_slice(3, 2, &[1.0, 5.0, 2.0, 5.0, 3.0, 5.0]);
        standardize(&mut m);
        assert!(m.column(1).iter().all(|v| *v == 0.0));
        assert!(m.column(0).sum().abs() < 1e-12);
    }
}
