//! Batch statistics and the inconsistency table.
//!
//! Every pre-filter batch ends up in exactly one place: a statistics row when
//! channels survived filtering, the inconsistency table when none did, or the
//! failed list when filtering or processing the batch panicked.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

use crate::config::{AggregateConfig, Config};
use crate::metrics::stats::{mean, round_to};
use crate::outlier::{BatchOutlierFilter, Batches, FilterOutcome};
use crate::reference::{ReferenceChannelSelector, ReferenceDiagnostics};
use crate::types::{
    BatchKey, BatchRateStatus, ChannelId, ChannelSummary, EarlyCycleMetrics, InconsistencyCause,
    RateCycleMetrics, ReferenceMethod, RetentionMetrics,
};

/// Mean first-cycle and early-cycle values over the survivors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurvivorMeans {
    pub first_charge: Option<f64>,
    pub first_discharge: Option<f64>,
    pub first_efficiency: Option<f64>,
    pub first_voltage: Option<f64>,
    pub first_energy: Option<f64>,
    pub early_charge: [Option<f64>; 6],
    pub early_discharge: [Option<f64>; 6],
}

impl SurvivorMeans {
    pub fn from_channels(channels: &[&ChannelSummary]) -> Self {
        let mut means = Self {
            first_charge: rounded_mean(channels, |c| c.first.charge, 2),
            first_discharge: rounded_mean(channels, |c| c.first.discharge, 2),
            first_efficiency: rounded_mean(channels, |c| c.first.efficiency, 2),
            first_voltage: rounded_mean(channels, |c| c.first.voltage, 3),
            first_energy: rounded_mean(channels, |c| c.first.energy, 2),
            ..Self::default()
        };
        for (slot, cycle) in EarlyCycleMetrics::CYCLES.enumerate() {
            means.early_charge[slot] = rounded_mean(channels, |c| c.early.charge_at(cycle), 2);
            means.early_discharge[slot] = rounded_mean(channels, |c| c.early.discharge_at(cycle), 2);
        }
        means
    }
}

fn rounded_mean<F>(channels: &[&ChannelSummary], get: F, decimals: i32) -> Option<f64>
where
    F: Fn(&ChannelSummary) -> Option<f64>,
{
    let values: Vec<f64> = channels
        .iter()
        .filter_map(|c| get(c))
        .filter(|v| v.is_finite())
        .collect();
    mean(&values).map(|m| round_to(m, decimals))
}

/// Reference channel fields, copied as-is from its summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSnapshot {
    pub channel: ChannelId,
    pub method: ReferenceMethod,
    pub rate: RateCycleMetrics,
    pub cycle_count: usize,
    pub retention: Option<RetentionMetrics>,
}

impl ReferenceSnapshot {
    fn of(channel: &ChannelSummary, method: ReferenceMethod) -> Self {
        Self {
            channel: channel.channel.clone(),
            method,
            rate: channel.rate,
            cycle_count: channel.cycle_count,
            retention: channel.retention,
        }
    }
}

/// One statistics row.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatistics {
    pub key: BatchKey,
    pub shelf_time: String,
    pub total_count: usize,
    pub valid_count: usize,
    pub means: SurvivorMeans,
    pub rate_valid_count: usize,
    pub batch_rate_status: Option<BatchRateStatus>,
    pub reference: Option<ReferenceSnapshot>,
}

/// A batch that lost every channel during filtering.
#[derive(Debug, Clone)]
pub struct InconsistentBatch<'c> {
    pub key: BatchKey,
    pub cause: InconsistencyCause,
    pub severe_count: usize,
    pub channels: Vec<&'c ChannelSummary>,
}

/// A batch whose processing panicked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBatch {
    pub batch: BatchKey,
    pub reason: String,
}

/// Everything the aggregator produces.
#[derive(Debug, Default)]
pub struct AggregateReport<'c> {
    pub statistics: Vec<BatchStatistics>,
    pub inconsistent: Vec<InconsistentBatch<'c>>,
    pub failed: Vec<FailedBatch>,
    pub diagnostics: Vec<ReferenceDiagnostics>,
}

enum BatchResult<'c> {
    Statistics(BatchStatistics, ReferenceDiagnostics),
    Inconsistent(InconsistentBatch<'c>),
}

/// Builds statistics rows from grouped and filtered channels.
pub struct BatchStatisticsAggregator<'a> {
    config: &'a Config,
}

impl<'a> BatchStatisticsAggregator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Filter and aggregate every pre-filter batch with the configured
    /// outlier method.
    pub fn aggregate<'c>(&self, groups: &Batches<'c>) -> (FilterOutcome<'c>, AggregateReport<'c>) {
        let filter = BatchOutlierFilter::new(&self.config.outlier);
        info!(method = %filter.method(), batches = groups.len(), "Filtering batches");
        self.aggregate_with(groups, |channels| filter.filter_batch(channels))
    }

    /// Same as [`aggregate`](Self::aggregate) with an explicit per-batch
    /// filter. Filtering runs inside the batch's isolation boundary, so a
    /// failure anywhere in a batch only costs that batch.
    pub fn aggregate_with<'c, F>(
        &self,
        groups: &Batches<'c>,
        filter: F,
    ) -> (FilterOutcome<'c>, AggregateReport<'c>)
    where
        F: Fn(&[&'c ChannelSummary]) -> Vec<&'c ChannelSummary>,
    {
        let mut outcome = FilterOutcome::default();
        let mut report = AggregateReport::default();

        for (key, all) in groups {
            let result = self.isolated(key, || {
                let survivors = filter(all.as_slice());
                let batch = self.process_batch(key, all, &survivors);
                (survivors, batch)
            });
            match result {
                Ok((survivors, BatchResult::Statistics(row, diagnostics))) => {
                    outcome.record(key, survivors);
                    report.statistics.push(row);
                    report.diagnostics.push(diagnostics);
                }
                Ok((survivors, BatchResult::Inconsistent(batch))) => {
                    outcome.record(key, survivors);
                    report.inconsistent.push(batch);
                }
                Err(failed) => report.failed.push(failed),
            }
        }

        info!(
            batches = groups.len(),
            channels_in = groups.values().map(Vec::len).sum::<usize>(),
            channels_out = outcome.survivor_count(),
            statistics = report.statistics.len(),
            inconsistent = report.inconsistent.len(),
            failed = report.failed.len(),
            "Aggregation complete"
        );
        (outcome, report)
    }

    /// Run `work` for one batch, turning a panic into a failed-batch record
    /// when isolation is enabled.
    pub fn isolated<T, F>(&self, key: &BatchKey, work: F) -> Result<T, FailedBatch>
    where
        F: FnOnce() -> T,
    {
        if !self.config.aggregate.isolate_batch_failures {
            return Ok(work());
        }

        panic::catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(batch = %key, reason = %reason, "Batch processing failed");
            FailedBatch {
                batch: key.clone(),
                reason,
            }
        })
    }

    fn process_batch<'c>(
        &self,
        key: &BatchKey,
        all: &[&'c ChannelSummary],
        survivors: &[&'c ChannelSummary],
    ) -> BatchResult<'c> {
        if survivors.is_empty() {
            return BatchResult::Inconsistent(classify_inconsistency(
                key,
                all,
                &self.config.aggregate,
                self.config.rate.very_low_efficiency_threshold,
            ));
        }

        let selector = ReferenceChannelSelector::new(&self.config.reference);
        let reference = selector.resolve(key, survivors);

        let shelf_time = all
            .first()
            .map(|c| c.shelf_time.clone())
            .unwrap_or_default();

        let row = BatchStatistics {
            key: key.clone(),
            shelf_time,
            total_count: all.len(),
            valid_count: survivors.len(),
            means: SurvivorMeans::from_channels(survivors),
            rate_valid_count: reference.rate_valid_count,
            batch_rate_status: reference.status,
            reference: reference
                .choice
                .map(|choice| ReferenceSnapshot::of(choice.channel, choice.method)),
        };

        debug!(
            batch = %key,
            total = row.total_count,
            valid = row.valid_count,
            reference = ?reference.diagnostics.chosen,
            "Batch aggregated"
        );

        BatchResult::Statistics(row, reference.diagnostics)
    }
}

/// Whether a channel counts toward the "likely true defect" share.
pub fn is_severe(channel: &ChannelSummary, very_low_efficiency: f64) -> bool {
    channel.rate.status.is_severe()
        || channel
            .first
            .efficiency
            .map_or(false, |e| e < very_low_efficiency)
}

/// Route a fully-removed batch to the inconsistency table with its cause.
pub fn classify_inconsistency<'c>(
    key: &BatchKey,
    channels: &[&'c ChannelSummary],
    config: &AggregateConfig,
    very_low_efficiency: f64,
) -> InconsistentBatch<'c> {
    let severe_count = channels
        .iter()
        .filter(|c| is_severe(c, very_low_efficiency))
        .count();
    let share = if channels.is_empty() {
        0.0
    } else {
        severe_count as f64 / channels.len() as f64
    };
    let cause = if share >= config.defect_fraction {
        InconsistencyCause::LikelyTrueDefect
    } else {
        InconsistencyCause::HighNaturalVariance
    };

    warn!(
        batch = %key,
        channels = channels.len(),
        severe = severe_count,
        cause = %cause,
        "Batch needs retest"
    );

    InconsistentBatch {
        key: key.clone(),
        cause,
        severe_count,
        channels: channels.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoxplotMetric, OutlierMethod};
    use crate::metrics::test_support::{channel, channel_in, with_status};
    use crate::outlier::group_batches;
    use crate::types::{RateStatus, ScalarMetric};

    fn run<'c>(config: &Config, channels: &'c [ChannelSummary]) -> AggregateReport<'c> {
        let groups = group_batches(channels);
        BatchStatisticsAggregator::new(config).aggregate(&groups).1
    }

    fn same_bits(a: Option<f64>, b: Option<f64>) -> bool {
        a.map(f64::to_bits) == b.map(f64::to_bits)
    }

    #[test]
    fn test_statistics_row() {
        let config = Config::default();
        let channels: Vec<ChannelSummary> = [300.0, 302.0, 298.0, 301.0, 150.0]
            .iter()
            .enumerate()
            .map(|(i, v)| channel(&format!("{}-1", i + 1), *v))
            .collect();

        let report = run(&config, &channels);
        assert_eq!(report.statistics.len(), 1);
        let row = &report.statistics[0];
        assert_eq!(row.total_count, 5);
        assert_eq!(row.valid_count, 4);
        assert_eq!(row.means.first_discharge, Some(300.25));
        assert_eq!(row.rate_valid_count, 4);
        assert_eq!(row.batch_rate_status, Some(BatchRateStatus::Normal));
        assert!(row.reference.is_some());
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[test]
    fn test_reference_fields_are_copied_exactly() {
        let config = Config::default();
        let mut channels = vec![channel("1-1", 300.0), channel("2-1", 301.0)];
        channels[0].rate.efficiency = Some(0.1 + 0.2);
        channels[1].rate.efficiency = Some(0.1 + 0.2);

        let report = run(&config, &channels);
        let snapshot = report.statistics[0].reference.as_ref().unwrap();
        let source = channels
            .iter()
            .find(|c| c.channel == snapshot.channel)
            .unwrap();

        assert!(same_bits(snapshot.rate.efficiency, source.rate.efficiency));
        assert!(same_bits(snapshot.rate.discharge, source.rate.discharge));
        assert!(same_bits(snapshot.rate.ratio, source.rate.ratio));
        assert_eq!(snapshot.rate.index, source.rate.index);
        assert_eq!(snapshot.cycle_count, source.cycle_count);
        assert_eq!(snapshot.retention, source.retention);
    }

    #[test]
    fn test_all_severe_batch_has_row_without_reference() {
        let config = Config::default();
        let channels = vec![
            with_status(channel("1-1", 300.0), RateStatus::Overcharge),
            with_status(channel("2-1", 301.0), RateStatus::VeryLowEfficiency),
        ];
        let report = run(&config, &channels);
        let row = &report.statistics[0];
        assert!(row.reference.is_none());
        assert_eq!(
            row.batch_rate_status,
            Some(BatchRateStatus::VeryLowEfficiencyNoReference)
        );
    }

    fn emptying_config() -> Config {
        let mut config = Config::default();
        config.outlier.method = OutlierMethod::Boxplot;
        config.outlier.boxplot.shrink_factor = 0.01;
        config.outlier.boxplot.metrics = vec![BoxplotMetric {
            metric: ScalarMetric::FirstDischarge,
            max_range: 0.0,
        }];
        config
    }

    #[test]
    fn test_emptied_batch_goes_to_inconsistency() {
        let config = emptying_config();
        let channels = vec![
            with_status(channel("1-1", 250.0), RateStatus::VeryLowEfficiency),
            with_status(channel("2-1", 260.0), RateStatus::Overcharge),
            channel("3-1", 340.0),
            channel("4-1", 350.0),
        ];
        let report = run(&config, &channels);

        assert!(report.statistics.is_empty());
        assert_eq!(report.inconsistent.len(), 1);
        let batch = &report.inconsistent[0];
        assert_eq!(batch.channels.len(), 4);
        assert_eq!(batch.severe_count, 2);
        // exactly half severe still counts as a defect
        assert_eq!(batch.cause, InconsistencyCause::LikelyTrueDefect);
    }

    #[test]
    fn test_inconsistency_cause_by_share() {
        let config = AggregateConfig::default();
        let key = channel("1-1", 300.0).batch_key();

        let mut low_first = channel("1-1", 300.0);
        low_first.first.efficiency = Some(75.0);
        let healthy = [channel("2-1", 300.0), channel("3-1", 300.0), channel("4-1", 300.0)];

        let mut members: Vec<&ChannelSummary> = healthy.iter().collect();
        members.push(&low_first);
        let batch = classify_inconsistency(&key, &members, &config, 80.0);
        assert_eq!(batch.severe_count, 1);
        assert_eq!(batch.cause, InconsistencyCause::HighNaturalVariance);

        let batch = classify_inconsistency(&key, &[&low_first, &healthy[0]], &config, 80.0);
        assert_eq!(batch.cause, InconsistencyCause::LikelyTrueDefect);
    }

    #[test]
    fn test_panic_is_isolated() {
        let config = Config::default();
        let aggregator = BatchStatisticsAggregator::new(&config);
        let key = channel("1-1", 300.0).batch_key();

        let failed = aggregator
            .isolated(&key, || -> usize { panic!("bad batch") })
            .unwrap_err();
        assert_eq!(failed.batch, key);
        assert_eq!(failed.reason, "bad batch");

        assert_eq!(aggregator.isolated(&key, || 7).unwrap(), 7);
    }

    #[test]
    fn test_batches_are_independent() {
        let config = emptying_config();
        let mut channels = vec![channel("1-1", 250.0), channel("2-1", 300.0)];
        channels.push(channel_in("B2", "9-1", 280.0, 12));

        let report = run(&config, &channels);
        // B1 is emptied, the single-channel B2 passes through
        assert_eq!(report.inconsistent.len(), 1);
        assert_eq!(report.statistics.len(), 1);
        assert_eq!(report.statistics[0].key.unified_batch, "B2");
        assert_eq!(
            report.statistics[0].reference.as_ref().unwrap().method,
            ReferenceMethod::SoleCandidate
        );
    }

    #[test]
    fn test_panicking_filter_fails_only_its_batch() {
        let config = Config::default();
        let mut channels = vec![channel("1-1", 300.0), channel("2-1", 301.0)];
        channels.push(channel_in("B2", "9-1", 280.0, 12));
        channels.push(channel_in("B2", "9-2", 281.0, 12));
        let groups = group_batches(&channels);

        let (outcome, report) = BatchStatisticsAggregator::new(&config).aggregate_with(&groups, |batch| {
            if batch[0].unified_batch_id == "B2" {
                panic!("filter failed");
            }
            batch.to_vec()
        });

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].batch.unified_batch, "B2");
        assert_eq!(report.failed[0].reason, "filter failed");
        assert_eq!(report.statistics.len(), 1);
        assert_eq!(outcome.survivor_count(), 2);
        assert!(outcome.fully_removed.is_empty());
        assert!(!outcome.filtered.contains_key(&report.failed[0].batch));
    }

    #[test]
    fn test_filter_outcome_matches_rows() {
        let config = emptying_config();
        let mut channels = vec![channel("1-1", 250.0), channel("2-1", 300.0)];
        channels.push(channel_in("B2", "9-1", 280.0, 12));
        let groups = group_batches(&channels);

        let (outcome, report) = BatchStatisticsAggregator::new(&config).aggregate(&groups);
        assert_eq!(outcome.fully_removed.len(), report.inconsistent.len());
        assert_eq!(outcome.filtered.len(), report.statistics.len());
        assert_eq!(outcome.survivor_count(), 1);
    }
}
