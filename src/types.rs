//! Core types for cellqc.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One charge/discharge cycle of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_index: u32,
    /// mAh/g
    pub charge_capacity: f64,
    /// mAh/g
    pub discharge_capacity: f64,
    /// V
    pub median_discharge_voltage: f64,
    /// mWh/g
    pub discharge_energy: f64,
}

/// Declared test protocol of a channel, derived from its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestMode {
    #[serde(rename = "RATE_1C")]
    Rate1C,
    #[serde(rename = "LOW_RATE_0P1C")]
    LowRate0p1C,
    #[serde(rename = "BASELINE")]
    Baseline,
    #[serde(rename = "OTHER")]
    Other,
}

impl TestMode {
    /// Parse test mode from a filename token such as `-1C-` or `0.1C`.
    pub fn from_token(token: &str) -> Option<Self> {
        let normalized = token.trim_matches('-').to_uppercase();
        match normalized.as_str() {
            "1C" => Some(TestMode::Rate1C),
            "0.1C" => Some(TestMode::LowRate0p1C),
            "BL" => Some(TestMode::Baseline),
            "0.5C" | "0.33C" => Some(TestMode::Other),
            _ => None,
        }
    }

    /// Returns true if channels in this mode carry a located rate cycle.
    pub fn is_rate_test(&self) -> bool {
        matches!(self, TestMode::Rate1C)
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestMode::Rate1C => write!(f, "RATE_1C"),
            TestMode::LowRate0p1C => write!(f, "LOW_RATE_0P1C"),
            TestMode::Baseline => write!(f, "BASELINE"),
            TestMode::Other => write!(f, "OTHER"),
        }
    }
}

/// Health classification of a channel's rate cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateStatus {
    Normal,
    LowEfficiency,
    VeryLowEfficiency,
    Overcharge,
    /// Rate-tested channel with too few cycles to locate a rate cycle
    NotFound,
    /// Channel was not tested at 1C
    NotApplicable,
}

impl RateStatus {
    /// Overcharged and very-low-efficiency channels point to a real cell defect.
    pub fn is_severe(&self) -> bool {
        matches!(self, RateStatus::Overcharge | RateStatus::VeryLowEfficiency)
    }
}

impl fmt::Display for RateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateStatus::Normal => write!(f, "NORMAL"),
            RateStatus::LowEfficiency => write!(f, "LOW_EFFICIENCY"),
            RateStatus::VeryLowEfficiency => write!(f, "VERY_LOW_EFFICIENCY"),
            RateStatus::Overcharge => write!(f, "OVERCHARGE"),
            RateStatus::NotFound => write!(f, "NOT_FOUND"),
            RateStatus::NotApplicable => write!(f, "NOT_APPLICABLE"),
        }
    }
}

/// Batch-level rate status, derived from the reference candidate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchRateStatus {
    Normal,
    LowEfficiency,
    VeryLowEfficiencyNoReference,
}

impl fmt::Display for BatchRateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchRateStatus::Normal => write!(f, "NORMAL"),
            BatchRateStatus::LowEfficiency => write!(f, "LOW_EFFICIENCY"),
            BatchRateStatus::VeryLowEfficiencyNoReference => {
                write!(f, "VERY_LOW_EFFICIENCY_NO_REFERENCE")
            }
        }
    }
}

/// How a reference channel was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMethod {
    Traditional,
    Pca,
    CurveRetentionMse,
    /// Only one eligible candidate; no scoring ran
    SoleCandidate,
    /// Every scoring method declined; first eligible candidate used
    FirstCandidate,
}

impl fmt::Display for ReferenceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceMethod::Traditional => write!(f, "TRADITIONAL"),
            ReferenceMethod::Pca => write!(f, "PCA"),
            ReferenceMethod::CurveRetentionMse => write!(f, "CURVE_RETENTION_MSE"),
            ReferenceMethod::SoleCandidate => write!(f, "SOLE_CANDIDATE"),
            ReferenceMethod::FirstCandidate => write!(f, "FIRST_CANDIDATE"),
        }
    }
}

/// Scalar per-channel metric addressable by name from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarMetric {
    FirstCharge,
    FirstDischarge,
    FirstEfficiency,
    FirstVoltage,
    FirstEnergy,
    Cycle4Discharge,
    RateDischarge,
    RateEfficiency,
}

impl fmt::Display for ScalarMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarMetric::FirstCharge => "first_charge",
            ScalarMetric::FirstDischarge => "first_discharge",
            ScalarMetric::FirstEfficiency => "first_efficiency",
            ScalarMetric::FirstVoltage => "first_voltage",
            ScalarMetric::FirstEnergy => "first_energy",
            ScalarMetric::Cycle4Discharge => "cycle4_discharge",
            ScalarMetric::RateDischarge => "rate_discharge",
            ScalarMetric::RateEfficiency => "rate_efficiency",
        };
        f.write_str(name)
    }
}

/// Physical test channel identity (tester host plus channel slot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId {
    pub host_id: String,
    pub channel_id: String,
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.host_id, self.channel_id)
    }
}

/// Grouping key for a batch: series plus unified batch id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchKey {
    pub series: String,
    pub unified_batch: String,
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.series, self.unified_batch)
    }
}

/// Metadata recovered from a cycle export's filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub channel: ChannelId,
    pub series: String,
    pub batch_id: String,
    pub shelf_time: String,
    pub test_mode: TestMode,
}

/// One loaded channel before any derived metric is computed.
#[derive(Debug, Clone)]
pub struct ChannelDataset {
    pub source_file: String,
    pub metadata: FileMetadata,
    pub cycles: Vec<CycleRecord>,
}

/// First-cycle (formation) metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FirstCycleMetrics {
    pub charge: Option<f64>,
    pub discharge: Option<f64>,
    pub efficiency: Option<f64>,
    pub voltage: Option<f64>,
    pub energy: Option<f64>,
}

/// Charge/discharge capacities of cycles 2 through 7.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EarlyCycleMetrics {
    pub charge: [Option<f64>; 6],
    pub discharge: [Option<f64>; 6],
}

impl EarlyCycleMetrics {
    /// Cycle numbers (1-based) covered by this table.
    pub const CYCLES: std::ops::RangeInclusive<usize> = 2..=7;

    pub fn charge_at(&self, cycle_number: usize) -> Option<f64> {
        cycle_number
            .checked_sub(2)
            .and_then(|i| self.charge.get(i).copied().flatten())
    }

    pub fn discharge_at(&self, cycle_number: usize) -> Option<f64> {
        cycle_number
            .checked_sub(2)
            .and_then(|i| self.discharge.get(i).copied().flatten())
    }
}

/// Rate-cycle (1C) metrics for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateCycleMetrics {
    /// 0-based index into the cycle sequence
    pub index: Option<usize>,
    pub charge: Option<f64>,
    pub discharge: Option<f64>,
    pub efficiency: Option<f64>,
    /// Rate discharge as a percentage of first discharge
    pub ratio: Option<f64>,
    pub status: RateStatus,
}

impl RateCycleMetrics {
    pub fn not_applicable() -> Self {
        Self::empty(RateStatus::NotApplicable)
    }

    pub fn not_found() -> Self {
        Self::empty(RateStatus::NotFound)
    }

    fn empty(status: RateStatus) -> Self {
        Self {
            index: None,
            charge: None,
            discharge: None,
            efficiency: None,
            ratio: None,
            status,
        }
    }
}

/// Capacity/voltage/energy retention against a baseline cycle, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RetentionPoint {
    pub capacity: Option<f64>,
    pub voltage: Option<f64>,
    pub energy: Option<f64>,
}

/// Full retention picture of a channel with enough cycles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetentionMetrics {
    pub baseline_index: usize,
    pub current: RetentionPoint,
    pub at_100: Option<RetentionPoint>,
    pub at_200: Option<RetentionPoint>,
    pub voltage_decay_mv_per_cycle: Option<f64>,
}

/// Immutable per-channel summary. Built once after loading.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSummary {
    pub channel: ChannelId,
    pub series: String,
    pub batch_id: String,
    pub unified_batch_id: String,
    pub shelf_time: String,
    pub source_file: String,
    pub test_mode: TestMode,
    pub cycle_count: usize,
    pub first: FirstCycleMetrics,
    pub early: EarlyCycleMetrics,
    pub rate: RateCycleMetrics,
    pub retention: Option<RetentionMetrics>,
    pub cycles: Vec<CycleRecord>,
}

impl ChannelSummary {
    pub fn batch_key(&self) -> BatchKey {
        BatchKey {
            series: self.series.clone(),
            unified_batch: self.unified_batch_id.clone(),
        }
    }

    /// Look up a scalar metric by name.
    pub fn metric(&self, metric: ScalarMetric) -> Option<f64> {
        let value = match metric {
            ScalarMetric::FirstCharge => self.first.charge,
            ScalarMetric::FirstDischarge => self.first.discharge,
            ScalarMetric::FirstEfficiency => self.first.efficiency,
            ScalarMetric::FirstVoltage => self.first.voltage,
            ScalarMetric::FirstEnergy => self.first.energy,
            ScalarMetric::Cycle4Discharge => self.early.discharge_at(4),
            ScalarMetric::RateDischarge => self.rate.discharge,
            ScalarMetric::RateEfficiency => self.rate.efficiency,
        };
        value.filter(|v| v.is_finite())
    }

    /// Cycle the retention curve starts from: the rate cycle for 1C channels,
    /// otherwise the first cycle.
    pub fn retention_baseline(&self) -> usize {
        self.retention
            .map(|r| r.baseline_index)
            .or(self.rate.index)
            .unwrap_or(0)
    }
}

/// Why a batch lost every channel during outlier filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyCause {
    LikelyTrueDefect,
    HighNaturalVariance,
}

impl fmt::Display for InconsistencyCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InconsistencyCause::LikelyTrueDefect => write!(f, "likely true defect"),
            InconsistencyCause::HighNaturalVariance => write!(f, "high natural variance"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_token() {
        assert_eq!(TestMode::from_token("-1C-"), Some(TestMode::Rate1C));
        assert_eq!(TestMode::from_token("0.1c"), Some(TestMode::LowRate0p1C));
        assert_eq!(TestMode::from_token("-BL-"), Some(TestMode::Baseline));
        assert_eq!(TestMode::from_token("0.33C"), Some(TestMode::Other));
        assert_eq!(TestMode::from_token("2C"), None);
    }

    #[test]
    fn test_rate_status_serialization() {
        let json = serde_json::to_string(&RateStatus::VeryLowEfficiency).unwrap();
        assert_eq!(json, "\"VERY_LOW_EFFICIENCY\"");
        assert_eq!(RateStatus::VeryLowEfficiency.to_string(), "VERY_LOW_EFFICIENCY");
    }

    #[test]
    fn test_severe_statuses() {
        assert!(RateStatus::Overcharge.is_severe());
        assert!(RateStatus::VeryLowEfficiency.is_severe());
        assert!(!RateStatus::LowEfficiency.is_severe());
        assert!(!RateStatus::NotFound.is_severe());
    }

    #[test]
    fn test_early_cycle_lookup() {
        let mut early = EarlyCycleMetrics::default();
        early.discharge[2] = Some(281.5);
        assert_eq!(early.discharge_at(4), Some(281.5));
        assert_eq!(early.discharge_at(1), None);
        assert_eq!(early.discharge_at(8), None);
    }

    #[test]
    fn test_channel_id_display() {
        let id = ChannelId {
            host_id: "10.2".to_string(),
            channel_id: "3-7".to_string(),
        };
        assert_eq!(id.to_string(), "10.2-3-7");
    }
}
