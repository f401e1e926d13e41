//! Per-channel metric computation.
//!
//! Turns a loaded [`ChannelDataset`] into an immutable [`ChannelSummary`]:
//! first-cycle metrics, cycles 2-7, the rate cycle and retention.

use tracing::debug;

use crate::config::{Config, ScreeningConfig};
use crate::loader::filename::unify_batch_id;
use crate::rate::RateCycleLocator;
use crate::retention::RetentionCalculator;
use crate::types::{
    ChannelDataset, ChannelSummary, CycleRecord, EarlyCycleMetrics, FirstCycleMetrics,
};

pub mod stats;

use stats::{percent, round_to};

/// Why a channel is kept out of batch consolidation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenReason {
    /// Only the formation cycle is available
    SingleCycle,
    /// First cycle outside plausible limits
    AbnormalFirstCycle(String),
}

impl std::fmt::Display for ScreenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScreenReason::SingleCycle => write!(f, "single cycle"),
            ScreenReason::AbnormalFirstCycle(detail) => write!(f, "abnormal first cycle: {}", detail),
        }
    }
}

/// Builds channel summaries with a fixed configuration.
pub struct ChannelSummarizer<'a> {
    config: &'a Config,
}

impl<'a> ChannelSummarizer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn summarize(&self, dataset: ChannelDataset) -> ChannelSummary {
        let ChannelDataset {
            source_file,
            metadata,
            cycles,
        } = dataset;

        let locator = RateCycleLocator::new(&self.config.rate);
        let rate = locator.analyze(&cycles, metadata.test_mode);

        let calculator = RetentionCalculator::new(&self.config.retention, &self.config.rate);
        let retention = calculator.metrics(&cycles, metadata.test_mode, rate.index);

        debug!(
            channel = %metadata.channel,
            batch = %metadata.batch_id,
            cycles = cycles.len(),
            rate_status = %rate.status,
            "Channel summarized"
        );

        ChannelSummary {
            unified_batch_id: unify_batch_id(&metadata.batch_id),
            channel: metadata.channel,
            series: metadata.series,
            batch_id: metadata.batch_id,
            shelf_time: metadata.shelf_time,
            source_file,
            test_mode: metadata.test_mode,
            cycle_count: cycles.len(),
            first: first_cycle_metrics(&cycles),
            early: early_cycle_metrics(&cycles),
            rate,
            retention,
            cycles,
        }
    }
}

/// First-cycle metrics, rounded the way they are reported.
pub fn first_cycle_metrics(cycles: &[CycleRecord]) -> FirstCycleMetrics {
    let Some(first) = cycles.first() else {
        return FirstCycleMetrics::default();
    };
    let charge = round_to(first.charge_capacity, 1);
    let discharge = round_to(first.discharge_capacity, 1);
    FirstCycleMetrics {
        charge: Some(charge),
        discharge: Some(discharge),
        efficiency: percent(discharge, charge).map(|e| round_to(e, 1)),
        voltage: Some(round_to(first.median_discharge_voltage, 2)),
        energy: Some(round_to(first.discharge_energy, 1)),
    }
}

/// Charge and discharge capacities of cycles 2-7 where present.
pub fn early_cycle_metrics(cycles: &[CycleRecord]) -> EarlyCycleMetrics {
    let mut early = EarlyCycleMetrics::default();
    for (slot, cycle_number) in EarlyCycleMetrics::CYCLES.enumerate() {
        if let Some(cycle) = cycles.get(cycle_number - 1) {
            early.charge[slot] = Some(round_to(cycle.charge_capacity, 1));
            early.discharge[slot] = Some(round_to(cycle.discharge_capacity, 1));
        }
    }
    early
}

/// Decide whether a loaded channel may enter consolidation.
pub fn screen(cycles: &[CycleRecord], config: &ScreeningConfig) -> Option<ScreenReason> {
    if cycles.len() <= 1 {
        return Some(ScreenReason::SingleCycle);
    }
    if !config.enabled {
        return None;
    }

    let first = &cycles[0];
    if first.charge_capacity > config.max_first_charge {
        return Some(ScreenReason::AbnormalFirstCycle(format!(
            "charge {:.1} > {}",
            first.charge_capacity, config.max_first_charge
        )));
    }
    if first.charge_capacity < config.min_first_charge {
        return Some(ScreenReason::AbnormalFirstCycle(format!(
            "charge {:.1} < {}",
            first.charge_capacity, config.min_first_charge
        )));
    }
    if first.discharge_capacity < config.min_first_discharge {
        return Some(ScreenReason::AbnormalFirstCycle(format!(
            "discharge {:.1} < {}",
            first.discharge_capacity, config.min_first_discharge
        )));
    }
    None
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Builders shared by the consolidation tests.

    use crate::types::{
        ChannelId, ChannelSummary, CycleRecord, EarlyCycleMetrics, FirstCycleMetrics,
        RateCycleMetrics, RateStatus, TestMode,
    };

    /// A rate-tested channel with `cycles` fading cycles and the given first
    /// discharge; everything else is plausible filler.
    pub fn channel(name: &str, first_discharge: f64) -> ChannelSummary {
        channel_in("B1", name, first_discharge, 12)
    }

    pub fn channel_in(
        batch: &str,
        name: &str,
        first_discharge: f64,
        n_cycles: usize,
    ) -> ChannelSummary {
        let cycles: Vec<CycleRecord> = (0..n_cycles)
            .map(|i| {
                let d = if i == 0 {
                    first_discharge
                } else {
                    first_discharge * 0.9 - i as f64 * 0.3
                };
                CycleRecord {
                    cycle_index: i as u32,
                    charge_capacity: d / 0.92,
                    discharge_capacity: d,
                    median_discharge_voltage: 3.7 - i as f64 * 0.002,
                    discharge_energy: d * 3.6,
                }
            })
            .collect();

        ChannelSummary {
            channel: ChannelId {
                host_id: "M2-PC2-036".to_string(),
                channel_id: name.to_string(),
            },
            series: "Q3".to_string(),
            batch_id: format!("{}-0315", batch),
            unified_batch_id: batch.to_string(),
            shelf_time: "03-15".to_string(),
            source_file: format!("{}.csv", name),
            test_mode: TestMode::Rate1C,
            cycle_count: cycles.len(),
            first: FirstCycleMetrics {
                charge: Some(first_discharge / 0.92),
                discharge: Some(first_discharge),
                efficiency: Some(92.0),
                voltage: Some(3.7),
                energy: Some(first_discharge * 3.6),
            },
            early: EarlyCycleMetrics::default(),
            rate: RateCycleMetrics {
                index: Some(1),
                charge: Some(first_discharge * 0.9 / 0.92),
                discharge: Some(first_discharge * 0.9),
                efficiency: Some(92.0),
                ratio: Some(90.0),
                status: RateStatus::Normal,
            },
            retention: None,
            cycles,
        }
    }

    pub fn with_status(mut summary: ChannelSummary, status: RateStatus) -> ChannelSummary {
        summary.rate.status = status;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelId, FileMetadata, RateStatus, TestMode};

    fn cycles(n: usize) -> Vec<CycleRecord> {
        (0..n)
            .map(|i| CycleRecord {
                cycle_index: i as u32,
                charge_capacity: if i == 0 { 330.04 } else { 290.0 },
                discharge_capacity: if i == 0 { 300.06 } else { 250.0 - i as f64 * 0.1 },
                median_discharge_voltage: 3.712,
                discharge_energy: 1110.04,
            })
            .collect()
    }

    fn dataset(n: usize, mode: TestMode) -> ChannelDataset {
        ChannelDataset {
            source_file: "a.csv".to_string(),
            metadata: FileMetadata {
                channel: ChannelId {
                    host_id: "M2-PC2-036".to_string(),
                    channel_id: "8-1".to_string(),
                },
                series: "Q3".to_string(),
                batch_id: "Q3-2401-A1-1C-0315-S2".to_string(),
                shelf_time: "03-15".to_string(),
                test_mode: mode,
            },
            cycles: cycles(n),
        }
    }

    #[test]
    fn test_first_cycle_rounding() {
        let first = first_cycle_metrics(&cycles(3));
        assert_eq!(first.charge, Some(330.0));
        assert_eq!(first.discharge, Some(300.1));
        assert_eq!(first.voltage, Some(3.71));
        assert_eq!(first.energy, Some(1110.0));
        // 300.1 / 330.0
        assert_eq!(first.efficiency, Some(90.9));
    }

    #[test]
    fn test_early_cycles_present_only_when_available() {
        let early = early_cycle_metrics(&cycles(4));
        assert_eq!(early.discharge_at(2), Some(249.9));
        assert_eq!(early.discharge_at(4), Some(249.7));
        assert_eq!(early.discharge_at(5), None);
        assert_eq!(early.charge_at(3), Some(290.0));
    }

    #[test]
    fn test_summarize_rate_channel() {
        let config = Config::default();
        let summary = ChannelSummarizer::new(&config).summarize(dataset(20, TestMode::Rate1C));

        assert_eq!(summary.unified_batch_id, "Q3-2401-A1");
        assert_eq!(summary.cycle_count, 20);
        assert_eq!(summary.rate.index, Some(1));
        let retention = summary.retention.unwrap();
        assert_eq!(retention.baseline_index, 1);
        assert_eq!(summary.retention_baseline(), 1);
    }

    #[test]
    fn test_summarize_low_rate_channel() {
        let config = Config::default();
        let summary =
            ChannelSummarizer::new(&config).summarize(dataset(20, TestMode::LowRate0p1C));

        assert_eq!(summary.rate.status, RateStatus::NotApplicable);
        assert_eq!(summary.retention.unwrap().baseline_index, 0);
    }

    #[test]
    fn test_summarize_short_channel_has_no_retention() {
        let config = Config::default();
        let summary = ChannelSummarizer::new(&config).summarize(dataset(4, TestMode::Rate1C));
        assert!(summary.retention.is_none());
    }

    #[test]
    fn test_screening() {
        let config = ScreeningConfig::default();
        assert_eq!(screen(&cycles(1), &config), Some(ScreenReason::SingleCycle));
        assert_eq!(screen(&cycles(5), &config), None);

        let mut high = cycles(5);
        high[0].charge_capacity = 390.0;
        assert!(matches!(
            screen(&high, &config),
            Some(ScreenReason::AbnormalFirstCycle(_))
        ));

        let mut low = cycles(5);
        low[0].discharge_capacity = 150.0;
        assert!(matches!(
            screen(&low, &config),
            Some(ScreenReason::AbnormalFirstCycle(_))
        ));

        let disabled = ScreeningConfig {
            enabled: false,
            ..ScreeningConfig::default()
        };
        assert_eq!(screen(&high, &disabled), None);
    }
}
