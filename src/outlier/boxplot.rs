//! Iterative shrinking-boxplot filter.
//!
//! Each pass recomputes the quartiles of the surviving channels and narrows
//! the whiskers by `shrink_factor^iteration`, so tight batches converge in a
//! pass or two while a wide batch is peeled from the outside in.

use tracing::{debug, trace};

use crate::config::BoxplotConfig;
use crate::metrics::stats::{quartiles, MetricSummary};
use crate::types::{ChannelSummary, ScalarMetric};

/// Bounds applied during one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundsStep {
    pub iteration: u32,
    pub lower: f64,
    pub upper: f64,
    pub removed: usize,
}

/// Survivors of one batch plus the bounds used to get there.
#[derive(Debug)]
pub struct BoxplotResult<'c> {
    pub survivors: Vec<&'c ChannelSummary>,
    pub steps: Vec<BoundsStep>,
}

/// Whisker bounds for a given pass: `Q1 - IQR*shrink^i`, `Q3 + IQR*shrink^i`.
pub fn whisker_bounds(q1: f64, q3: f64, shrink: f64, iteration: u32) -> (f64, f64) {
    let reach = (q3 - q1) * shrink.powi(iteration as i32);
    (q1 - reach, q3 + reach)
}

fn present_values(channels: &[&ChannelSummary], metric: ScalarMetric) -> Vec<f64> {
    channels.iter().filter_map(|c| c.metric(metric)).collect()
}

/// Shrinking-boxplot strategy.
pub struct ShrinkingBoxplot<'a> {
    config: &'a BoxplotConfig,
}

impl<'a> ShrinkingBoxplot<'a> {
    pub fn new(config: &'a BoxplotConfig) -> Self {
        Self { config }
    }

    /// Filter one batch on one metric.
    ///
    /// Channels missing the metric are kept and do not influence the
    /// quartiles. Batches with fewer than two values pass through unchanged.
    pub fn filter_batch<'c>(
        &self,
        channels: &[&'c ChannelSummary],
        metric: ScalarMetric,
        max_range: f64,
    ) -> BoxplotResult<'c> {
        let mut survivors = channels.to_vec();
        let mut steps = Vec::new();

        let Some(summary) = MetricSummary::from_values(present_values(&survivors, metric)) else {
            return BoxplotResult { survivors, steps };
        };
        if summary.count < 2 {
            return BoxplotResult { survivors, steps };
        }

        let mut range = summary.range();
        let mut iteration = 0;

        while range > max_range && iteration < self.config.max_iterations && survivors.len() > 1 {
            iteration += 1;

            let values = present_values(&survivors, metric);
            if values.len() < 2 {
                break;
            }
            let Some((q1, q3)) = quartiles(&values) else {
                break;
            };
            let (lower, upper) = whisker_bounds(q1, q3, self.config.shrink_factor, iteration);

            let before = survivors.len();
            survivors.retain(|c| match c.metric(metric) {
                Some(v) => v >= lower && v <= upper,
                None => true,
            });
            let removed = before - survivors.len();

            trace!(
                metric = %metric,
                iteration,
                q1,
                q3,
                lower,
                upper,
                removed,
                "Boxplot pass"
            );
            steps.push(BoundsStep {
                iteration,
                lower,
                upper,
                removed,
            });

            if removed == 0 {
                break;
            }
            match MetricSummary::from_values(present_values(&survivors, metric)) {
                Some(s) => range = s.range(),
                None => break,
            }
        }

        debug!(
            metric = %metric,
            before = channels.len(),
            after = survivors.len(),
            iterations = iteration,
            final_range = range,
            "Boxplot filtering complete"
        );

        BoxplotResult { survivors, steps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::channel;

    fn batch(values: &[f64]) -> Vec<ChannelSummary> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| channel(&format!("{}-1", i + 1), *v))
            .collect()
    }

    #[test]
    fn test_removes_single_low_outlier() {
        let config = BoxplotConfig::default();
        let filter = ShrinkingBoxplot::new(&config);
        let channels = batch(&[300.0, 302.0, 298.0, 301.0, 150.0]);
        let refs: Vec<&ChannelSummary> = channels.iter().collect();

        let result = filter.filter_batch(&refs, ScalarMetric::FirstDischarge, 10.0);

        assert_eq!(result.survivors.len(), 4);
        assert!(result.steps.len() <= 2);
        assert!(result
            .survivors
            .iter()
            .all(|c| c.first.discharge != Some(150.0)));
        let values: Vec<f64> = result
            .survivors
            .iter()
            .filter_map(|c| c.first.discharge)
            .collect();
        let summary = MetricSummary::from_values(values).unwrap();
        assert!(summary.range() <= 10.0);
    }

    #[test]
    fn test_tight_batch_is_untouched() {
        let config = BoxplotConfig::default();
        let filter = ShrinkingBoxplot::new(&config);
        let channels = batch(&[300.0, 302.0, 298.0, 301.0]);
        let refs: Vec<&ChannelSummary> = channels.iter().collect();

        let result = filter.filter_batch(&refs, ScalarMetric::FirstDischarge, 10.0);
        assert_eq!(result.survivors.len(), 4);
        assert!(result.steps.is_empty());
    }

    #[test]
    fn test_degenerate_batches_pass_through() {
        let config = BoxplotConfig::default();
        let filter = ShrinkingBoxplot::new(&config);

        let single = batch(&[300.0]);
        let refs: Vec<&ChannelSummary> = single.iter().collect();
        assert_eq!(
            filter
                .filter_batch(&refs, ScalarMetric::FirstDischarge, 0.0)
                .survivors
                .len(),
            1
        );

        let identical = batch(&[300.0, 300.0, 300.0]);
        let refs: Vec<&ChannelSummary> = identical.iter().collect();
        let result = filter.filter_batch(&refs, ScalarMetric::FirstDischarge, 0.0);
        assert_eq!(result.survivors.len(), 3);
    }

    #[test]
    fn test_missing_metric_is_kept() {
        let config = BoxplotConfig::default();
        let filter = ShrinkingBoxplot::new(&config);
        let mut channels = batch(&[300.0, 302.0, 298.0, 301.0, 150.0]);
        channels[1].first.discharge = None;
        let refs: Vec<&ChannelSummary> = channels.iter().collect();

        let result = filter.filter_batch(&refs, ScalarMetric::FirstDischarge, 10.0);
        assert!(result
            .survivors
            .iter()
            .any(|c| c.first.discharge.is_none()));
        assert!(result
            .survivors
            .iter()
            .all(|c| c.first.discharge != Some(150.0)));
    }

    #[test]
    fn test_bounds_never_expand() {
        let (q1, q3) = (298.0, 301.0);
        let mut previous = whisker_bounds(q1, q3, 0.95, 1);
        for i in 2..=20 {
            let current = whisker_bounds(q1, q3, 0.95, i);
            assert!(current.0 >= previous.0);
            assert!(current.1 <= previous.1);
            previous = current;
        }
    }

    #[test]
    fn test_iterations_are_capped() {
        let config = BoxplotConfig {
            max_iterations: 2,
            ..BoxplotConfig::default()
        };
        let filter = ShrinkingBoxplot::new(&config);
        let channels = batch(&[100.0, 150.0, 200.0, 250.0, 300.0, 350.0, 400.0]);
        let refs: Vec<&ChannelSummary> = channels.iter().collect();

        let result = filter.filter_batch(&refs, ScalarMetric::FirstDischarge, 1.0);
        assert!(result.steps.len() <= 2);
        assert!(result.survivors.len() <= channels.len());
    }
}
