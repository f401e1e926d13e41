//! Per-batch outlier rejection.
//!
//! Two interchangeable strategies run batch by batch over a grouped view of
//! the channel arena. Neither ever fails: degenerate batches come back
//! unchanged, and a batch that loses every channel is reported rather than
//! dropped.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::{OutlierConfig, OutlierMethod};
use crate::types::{BatchKey, ChannelSummary};

pub mod boxplot;
pub mod zscore;

use boxplot::ShrinkingBoxplot;
use zscore::ZScoreMad;

/// Grouped view over the channel arena.
pub type Batches<'c> = BTreeMap<BatchKey, Vec<&'c ChannelSummary>>;

/// Group channels by (series, unified batch), keeping input order.
pub fn group_batches<'c, I>(channels: I) -> Batches<'c>
where
    I: IntoIterator<Item = &'c ChannelSummary>,
{
    let mut batches: Batches<'c> = BTreeMap::new();
    for channel in channels {
        batches.entry(channel.batch_key()).or_default().push(channel);
    }
    batches
}

/// Result of filtering a set of batches.
#[derive(Debug, Default)]
pub struct FilterOutcome<'c> {
    /// Batches with at least one surviving channel
    pub filtered: Batches<'c>,
    /// Batches that lost every channel
    pub fully_removed: BTreeSet<BatchKey>,
}

impl<'c> FilterOutcome<'c> {
    pub fn survivor_count(&self) -> usize {
        self.filtered.values().map(Vec::len).sum()
    }

    /// File one batch's survivors; an empty result marks the batch as fully removed.
    pub fn record(&mut self, key: &BatchKey, survivors: Vec<&'c ChannelSummary>) {
        if survivors.is_empty() {
            debug!(batch = %key, "Batch fully removed");
            self.fully_removed.insert(key.clone());
        } else {
            self.filtered.insert(key.clone(), survivors);
        }
    }
}

/// Applies the configured outlier strategy to a batch.
pub struct BatchOutlierFilter<'a> {
    config: &'a OutlierConfig,
}

impl<'a> BatchOutlierFilter<'a> {
    pub fn new(config: &'a OutlierConfig) -> Self {
        Self { config }
    }

    pub fn method(&self) -> OutlierMethod {
        self.config.method
    }

    /// Run the configured method over one batch.
    ///
    /// The boxplot applies its metrics one after another, each on the
    /// survivors of the previous one. The Z-score method scores every
    /// metric on the same input and removes the union.
    pub fn filter_batch<'c>(&self, channels: &[&'c ChannelSummary]) -> Vec<&'c ChannelSummary> {
        match self.config.method {
            OutlierMethod::Boxplot => {
                let strategy = ShrinkingBoxplot::new(&self.config.boxplot);
                let mut survivors = channels.to_vec();
                for entry in &self.config.boxplot.metrics {
                    if survivors.is_empty() {
                        break;
                    }
                    survivors = strategy
                        .filter_batch(&survivors, entry.metric, entry.max_range)
                        .survivors;
                }
                survivors
            }
            OutlierMethod::ZscoreMad => ZScoreMad::new(&self.config.zscore_mad)
                .filter_batch(channels, &self.config.zscore_mad.metrics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoxplotMetric;
    use crate::metrics::test_support::{channel, channel_in};
    use crate::types::ScalarMetric;

    fn apply<'c>(config: &OutlierConfig, batches: &Batches<'c>) -> FilterOutcome<'c> {
        let filter = BatchOutlierFilter::new(config);
        let mut outcome = FilterOutcome::default();
        for (key, channels) in batches {
            outcome.record(key, filter.filter_batch(channels));
        }
        outcome
    }

    fn arena() -> Vec<ChannelSummary> {
        let mut channels: Vec<ChannelSummary> = [300.0, 302.0, 298.0, 301.0, 150.0]
            .iter()
            .enumerate()
            .map(|(i, v)| channel(&format!("{}-1", i + 1), *v))
            .collect();
        channels.push(channel_in("B2", "9-1", 280.0, 12));
        channels
    }

    fn is_subset(outcome: &FilterOutcome<'_>, input: &Batches<'_>) -> bool {
        outcome.filtered.iter().all(|(key, kept)| {
            let Some(original) = input.get(key) else {
                return false;
            };
            kept.len() <= original.len()
                && kept
                    .iter()
                    .all(|c| original.iter().any(|o| std::ptr::eq(*o, *c)))
        })
    }

    #[test]
    fn test_group_batches_keeps_order() {
        let channels = arena();
        let batches = group_batches(&channels);
        assert_eq!(batches.len(), 2);
        let b1 = &batches[&channels[0].batch_key()];
        assert_eq!(b1.len(), 5);
        assert_eq!(b1[4].first.discharge, Some(150.0));
    }

    #[test]
    fn test_default_pipeline_removes_outlier() {
        let config = OutlierConfig::default();
        let channels = arena();
        let batches = group_batches(&channels);

        let outcome = apply(&config, &batches);
        assert_eq!(outcome.filtered[&channels[0].batch_key()].len(), 4);
        assert_eq!(outcome.filtered[&channels[5].batch_key()].len(), 1);
        assert!(outcome.fully_removed.is_empty());
        assert!(is_subset(&outcome, &batches));
    }

    #[test]
    fn test_zscore_method_is_subset() {
        let config = OutlierConfig {
            method: OutlierMethod::ZscoreMad,
            ..OutlierConfig::default()
        };
        let channels = arena();
        let batches = group_batches(&channels);

        let outcome = apply(&config, &batches);
        assert!(is_subset(&outcome, &batches));
        assert_eq!(outcome.filtered[&channels[0].batch_key()].len(), 4);
    }

    #[test]
    fn test_fully_removed_batch_is_reported() {
        // A degenerate configuration that rejects everything
        let mut config = OutlierConfig::default();
        config.boxplot.shrink_factor = 0.01;
        config.boxplot.metrics = vec![BoxplotMetric {
            metric: ScalarMetric::FirstDischarge,
            max_range: 0.0,
        }];
        let channels = vec![channel("1-1", 250.0), channel("2-1", 300.0)];
        let batches = group_batches(&channels);

        let outcome = apply(&config, &batches);
        assert!(outcome.filtered.is_empty());
        assert!(outcome.fully_removed.contains(&channels[0].batch_key()));
    }

    #[test]
    fn test_empty_input() {
        let config = OutlierConfig::default();
        let outcome = apply(&config, &Batches::new());
        assert!(outcome.filtered.is_empty());
        assert!(outcome.fully_removed.is_empty());
    }
}
