//! Rate-cycle (1C) location and status classification.
//!
//! After one or more low-rate conditioning cycles the protocol switches to
//! 1C discharge. The first 1C cycle is recognised by a clear capacity drop
//! relative to the first cycle; both a relative and an absolute drop are
//! required so that noisy low-capacity cells are not misread.

use tracing::{debug, trace};

use crate::config::RateThresholds;
use crate::metrics::stats::{percent, round_to};
use crate::types::{CycleRecord, RateCycleMetrics, RateStatus, TestMode};

/// Locates the rate cycle inside a channel's cycle sequence.
pub struct RateCycleLocator<'a> {
    thresholds: &'a RateThresholds,
}

impl<'a> RateCycleLocator<'a> {
    pub fn new(thresholds: &'a RateThresholds) -> Self {
        Self { thresholds }
    }

    /// Return the 0-based index of the rate cycle.
    ///
    /// Candidates are cycles `1..=min(max_scan_index, len - 1)`; the first
    /// one whose discharge is both below `ratio_threshold` of the baseline and
    /// more than `discharge_diff_threshold` under it wins. Without a match the
    /// fallback index is used when the channel has that many cycles.
    pub fn locate(&self, cycles: &[CycleRecord], baseline_discharge: f64) -> Option<usize> {
        let last_candidate = self.thresholds.max_scan_index.min(cycles.len().saturating_sub(1));

        if baseline_discharge > 0.0 {
            for idx in 1..=last_candidate {
                let discharge = cycles[idx].discharge_capacity;
                let ratio = discharge / baseline_discharge;
                let diff = baseline_discharge - discharge;

                trace!(
                    cycle = idx + 1,
                    discharge,
                    ratio,
                    diff,
                    "Rate cycle candidate"
                );

                if ratio < self.thresholds.ratio_threshold
                    && diff > self.thresholds.discharge_diff_threshold
                {
                    debug!(cycle = idx + 1, ratio, diff, "Rate cycle located");
                    return Some(idx);
                }
            }
        }

        if cycles.len() > self.thresholds.fallback_index {
            debug!(
                cycle = self.thresholds.fallback_index + 1,
                "No rate cycle matched; using fallback"
            );
            return Some(self.thresholds.fallback_index);
        }

        None
    }

    /// Classify a rate cycle from its charge capacity and efficiency (%).
    ///
    /// Overcharge takes precedence over the efficiency checks. An undefined
    /// efficiency (no charge recorded) counts as very low.
    pub fn classify_status(&self, charge: f64, efficiency: Option<f64>) -> RateStatus {
        if charge > self.thresholds.overcharge_threshold {
            return RateStatus::Overcharge;
        }
        match efficiency {
            None => RateStatus::VeryLowEfficiency,
            Some(e) if e < self.thresholds.very_low_efficiency_threshold => {
                RateStatus::VeryLowEfficiency
            }
            Some(e) if e < self.thresholds.low_efficiency_threshold => RateStatus::LowEfficiency,
            Some(_) => RateStatus::Normal,
        }
    }

    /// Locate and describe the rate cycle of one channel.
    pub fn analyze(&self, cycles: &[CycleRecord], test_mode: TestMode) -> RateCycleMetrics {
        if !test_mode.is_rate_test() {
            return RateCycleMetrics::not_applicable();
        }
        let Some(first) = cycles.first() else {
            return RateCycleMetrics::not_found();
        };

        let Some(index) = self.locate(cycles, first.discharge_capacity) else {
            return RateCycleMetrics::not_found();
        };

        let cycle = &cycles[index];
        let charge = round_to(cycle.charge_capacity, 1);
        let discharge = round_to(cycle.discharge_capacity, 1);
        let efficiency = percent(discharge, charge).map(|e| round_to(e, 1));
        let ratio = percent(discharge, first.discharge_capacity).map(|r| round_to(r, 2));
        let status = self.classify_status(charge, efficiency);

        RateCycleMetrics {
            index: Some(index),
            charge: Some(charge),
            discharge: Some(discharge),
            efficiency,
            ratio,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(i: u32, charge: f64, discharge: f64) -> CycleRecord {
        CycleRecord {
            cycle_index: i,
            charge_capacity: charge,
            discharge_capacity: discharge,
            median_discharge_voltage: 3.7,
            discharge_energy: discharge * 3.7,
        }
    }

    fn cycles(pairs: &[(f64, f64)]) -> Vec<CycleRecord> {
        pairs
            .iter()
            .enumerate()
            .map(|(i, (c, d))| cycle(i as u32, *c, *d))
            .collect()
    }

    #[test]
    fn test_locates_second_cycle() {
        let thresholds = RateThresholds::default();
        let locator = RateCycleLocator::new(&thresholds);
        let data = cycles(&[(310.0, 300.0), (305.0, 250.0), (304.0, 290.0), (303.0, 284.0)]);

        assert_eq!(locator.locate(&data, 300.0), Some(1));
    }

    #[test]
    fn test_first_match_wins() {
        let thresholds = RateThresholds::default();
        let locator = RateCycleLocator::new(&thresholds);
        let data = cycles(&[(310.0, 300.0), (305.0, 295.0), (304.0, 240.0), (303.0, 230.0)]);

        assert_eq!(locator.locate(&data, 300.0), Some(2));
    }

    #[test]
    fn test_both_conditions_required() {
        let thresholds = RateThresholds::default();
        let locator = RateCycleLocator::new(&thresholds);
        // ratio 0.8 < 0.85 but diff 10 is not > 15
        let data = cycles(&[(55.0, 50.0), (45.0, 40.0), (45.0, 40.0)]);

        assert_eq!(locator.locate(&data, 50.0), None);
    }

    #[test]
    fn test_fallback_to_fourth_cycle() {
        let thresholds = RateThresholds::default();
        let locator = RateCycleLocator::new(&thresholds);
        let data = cycles(&[
            (310.0, 300.0),
            (305.0, 299.0),
            (304.0, 298.0),
            (303.0, 297.0),
            (303.0, 296.0),
        ]);

        assert_eq!(locator.locate(&data, 300.0), Some(3));
        assert_eq!(locator.locate(&data[..3], 300.0), None);
    }

    #[test]
    fn test_locate_is_pure() {
        let thresholds = RateThresholds::default();
        let locator = RateCycleLocator::new(&thresholds);
        let data = cycles(&[(310.0, 300.0), (305.0, 250.0), (304.0, 290.0), (303.0, 284.0)]);

        let first = locator.locate(&data, 300.0);
        let second = locator.locate(&data, 300.0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_baseline_never_matches() {
        let thresholds = RateThresholds::default();
        let locator = RateCycleLocator::new(&thresholds);
        let data = cycles(&[(0.0, 0.0), (305.0, 250.0)]);

        assert_eq!(locator.locate(&data, 0.0), None);
    }

    #[test]
    fn test_status_precedence() {
        let thresholds = RateThresholds::default();
        let locator = RateCycleLocator::new(&thresholds);

        assert_eq!(locator.classify_status(360.0, Some(70.0)), RateStatus::Overcharge);
        assert_eq!(locator.classify_status(300.0, Some(79.9)), RateStatus::VeryLowEfficiency);
        assert_eq!(locator.classify_status(300.0, Some(84.9)), RateStatus::LowEfficiency);
        assert_eq!(locator.classify_status(300.0, Some(85.0)), RateStatus::Normal);
        assert_eq!(locator.classify_status(300.0, None), RateStatus::VeryLowEfficiency);
    }

    #[test]
    fn test_analyze_rate_channel() {
        let thresholds = RateThresholds::default();
        let locator = RateCycleLocator::new(&thresholds);
        let data = cycles(&[(310.0, 300.0), (305.0, 250.0), (304.0, 290.0), (303.0, 284.0)]);

        let metrics = locator.analyze(&data, TestMode::Rate1C);
        assert_eq!(metrics.index, Some(1));
        assert_eq!(metrics.charge, Some(305.0));
        assert_eq!(metrics.discharge, Some(250.0));
        assert_eq!(metrics.efficiency, Some(82.0));
        assert_eq!(metrics.ratio, Some(83.33));
        assert_eq!(metrics.status, RateStatus::LowEfficiency);
    }

    #[test]
    fn test_analyze_non_rate_modes() {
        let thresholds = RateThresholds::default();
        let locator = RateCycleLocator::new(&thresholds);
        let data = cycles(&[(310.0, 300.0), (305.0, 250.0)]);

        let metrics = locator.analyze(&data, TestMode::LowRate0p1C);
        assert_eq!(metrics.status, RateStatus::NotApplicable);
        assert_eq!(metrics.index, None);

        let metrics = locator.analyze(&data[..1], TestMode::Rate1C);
        assert_eq!(metrics.status, RateStatus::NotFound);
    }
}
