//! Robust Z-score outlier detection with a MAD floor and optional
//! detrending.

use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::config::{MetricThreshold, ZScoreMadConfig};
use crate::metrics::stats::{linear_residuals, median, median_abs_deviation};
use crate::types::ChannelSummary;

/// Robust scores for one metric across a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MadScores {
    pub median: f64,
    /// Raw median absolute deviation
    pub mad: f64,
    pub floor: f64,
    /// `max(mad, floor)`, the divisor actually used
    pub effective_mad: f64,
    pub detrended: bool,
    /// Absolute score per input value, in input order
    pub scores: Vec<f64>,
}

/// Z-score+MAD strategy.
pub struct ZScoreMad<'a> {
    config: &'a ZScoreMadConfig,
}

impl<'a> ZScoreMad<'a> {
    pub fn new(config: &'a ZScoreMadConfig) -> Self {
        Self { config }
    }

    /// Score a set of values. `None` when there are fewer than two values or
    /// the effective MAD is zero.
    pub fn score(&self, values: &[f64]) -> Option<MadScores> {
        if values.len() < 2 {
            return None;
        }

        let center = median(values)?;
        let mad = median_abs_deviation(values, center)?;
        let floor = center.abs() * self.config.min_mad_ratio;
        let effective_mad = mad.max(floor);
        if !(effective_mad > 0.0) {
            return None;
        }

        let c = self.config.mad_constant;
        let mut scores: Vec<f64> = values
            .iter()
            .map(|x| (c * (x - center) / effective_mad).abs())
            .collect();

        let mut detrended = false;
        if self.config.use_detrended && values.len() >= self.config.min_samples_for_detrend {
            let residuals = linear_residuals(values);
            if let Some(r_center) = median(&residuals) {
                let r_mad = median_abs_deviation(&residuals, r_center).unwrap_or(0.0);
                if r_mad > 0.0 {
                    let r_effective = r_mad.max(floor);
                    for (score, r) in scores.iter_mut().zip(&residuals) {
                        let z = (c * (r - r_center) / r_effective).abs();
                        *score = score.max(z);
                    }
                    detrended = true;
                }
            }
        }

        Some(MadScores {
            median: center,
            mad,
            floor,
            effective_mad,
            detrended,
            scores,
        })
    }

    /// Positions (into `channels`) flagged by any of the metric thresholds.
    pub fn outliers(
        &self,
        channels: &[&ChannelSummary],
        thresholds: &[MetricThreshold],
    ) -> BTreeSet<usize> {
        let mut flagged = BTreeSet::new();
        if channels.len() < 2 {
            return flagged;
        }

        for entry in thresholds {
            let (positions, values): (Vec<usize>, Vec<f64>) = channels
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.metric(entry.metric).map(|v| (i, v)))
                .unzip();

            let Some(scored) = self.score(&values) else {
                trace!(metric = %entry.metric, present = values.len(), "Metric skipped");
                continue;
            };

            let before = flagged.len();
            for (position, score) in positions.iter().zip(&scored.scores) {
                if *score > entry.threshold {
                    flagged.insert(*position);
                }
            }

            trace!(
                metric = %entry.metric,
                median = scored.median,
                mad = scored.mad,
                effective_mad = scored.effective_mad,
                detrended = scored.detrended,
                flagged = flagged.len() - before,
                "Metric scored"
            );
        }

        flagged
    }

    /// Remove every channel flagged by any metric in one pass.
    pub fn filter_batch<'c>(
        &self,
        channels: &[&'c ChannelSummary],
        thresholds: &[MetricThreshold],
    ) -> Vec<&'c ChannelSummary> {
        let flagged = self.outliers(channels, thresholds);
        debug!(
            before = channels.len(),
            removed = flagged.len(),
            "Z-score filtering complete"
        );

        channels
            .iter()
            .enumerate()
            .filter(|(i, _)| !flagged.contains(i))
            .map(|(_, c)| *c)
            .collect()
    }
}
