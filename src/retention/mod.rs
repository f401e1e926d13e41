//! Capacity, voltage and energy retention relative to a baseline cycle.

use tracing::trace;

use crate::config::{RateThresholds, RetentionConfig};
use crate::metrics::stats::{percent, round_to};
use crate::types::{CycleRecord, RetentionMetrics, RetentionPoint, TestMode};

/// Fixed offsets (in cycles after the baseline) reported alongside "current".
pub const OFFSET_100: usize = 100;
pub const OFFSET_200: usize = 200;

/// Computes retention metrics for one channel.
pub struct RetentionCalculator<'a> {
    config: &'a RetentionConfig,
    rate: &'a RateThresholds,
}

impl<'a> RetentionCalculator<'a> {
    pub fn new(config: &'a RetentionConfig, rate: &'a RateThresholds) -> Self {
        Self { config, rate }
    }

    /// Baseline cycle for a channel: the rate cycle (or its fallback) in 1C
    /// mode, the first cycle otherwise.
    pub fn baseline_index(
        &self,
        cycle_count: usize,
        test_mode: TestMode,
        rate_index: Option<usize>,
    ) -> usize {
        if !test_mode.is_rate_test() {
            return 0;
        }
        rate_index.unwrap_or_else(|| {
            self.rate
                .fallback_index
                .min(cycle_count.saturating_sub(1))
        })
    }

    /// Retention at the last cycle (`target_offset == None`) or at
    /// `baseline_index + offset`.
    ///
    /// Returns `None` when the channel is too short, the baseline is out of
    /// range, or the offset cycle does not exist.
    pub fn compute(
        &self,
        cycles: &[CycleRecord],
        baseline_index: usize,
        target_offset: Option<usize>,
    ) -> Option<RetentionPoint> {
        if cycles.len() < self.config.min_cycle_count || baseline_index >= cycles.len() {
            return None;
        }

        let target_index = match target_offset {
            None => cycles.len() - 1,
            Some(offset) => baseline_index.checked_add(offset)?,
        };
        let target = cycles.get(target_index)?;
        let baseline = &cycles[baseline_index];

        Some(RetentionPoint {
            capacity: retention(target.discharge_capacity, baseline.discharge_capacity),
            voltage: retention(
                target.median_discharge_voltage,
                baseline.median_discharge_voltage,
            ),
            energy: retention(target.discharge_energy, baseline.discharge_energy),
        })
    }

    /// Median-voltage decay from the baseline to the last cycle, in mV/cycle.
    pub fn voltage_decay(&self, cycles: &[CycleRecord], baseline_index: usize) -> Option<f64> {
        if cycles.len() < self.config.min_cycle_count {
            return None;
        }
        let elapsed = (cycles.len() - 1).checked_sub(baseline_index)?;
        if elapsed == 0 {
            return None;
        }
        let baseline = cycles[baseline_index].median_discharge_voltage;
        let last = cycles[cycles.len() - 1].median_discharge_voltage;
        let decay = 1000.0 * (baseline - last) / elapsed as f64;
        decay.is_finite().then(|| round_to(decay, 1))
    }

    /// Full retention picture for one channel, or `None` for short channels.
    pub fn metrics(
        &self,
        cycles: &[CycleRecord],
        test_mode: TestMode,
        rate_index: Option<usize>,
    ) -> Option<RetentionMetrics> {
        if cycles.len() < self.config.min_cycle_count {
            trace!(cycles = cycles.len(), "Too few cycles for retention");
            return None;
        }

        let baseline_index = self.baseline_index(cycles.len(), test_mode, rate_index);
        let current = self.compute(cycles, baseline_index, None)?;

        Some(RetentionMetrics {
            baseline_index,
            current,
            at_100: self.compute(cycles, baseline_index, Some(OFFSET_100)),
            at_200: self.compute(cycles, baseline_index, Some(OFFSET_200)),
            voltage_decay_mv_per_cycle: self.voltage_decay(cycles, baseline_index),
        })
    }
}

fn retention(target: f64, baseline: f64) -> Option<f64> {
    percent(target, baseline).map(|v| round_to(v, 1))
}
