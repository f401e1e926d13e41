//! Flat row types for the CSV tables.
//!
//! Each struct fixes one table's column set and order; nested summaries are
//! spread into prefixed columns because CSV has no nesting.

use serde::Serialize;

use crate::aggregate::{BatchStatistics, InconsistentBatch};
use crate::pipeline::ScreenedChannel;
use crate::types::{
    BatchRateStatus, ChannelSummary, InconsistencyCause, RateStatus, ReferenceMethod,
    RetentionPoint, TestMode,
};

fn point(retention: Option<RetentionPoint>) -> (Option<f64>, Option<f64>, Option<f64>) {
    retention.map_or((None, None, None), |p| (p.capacity, p.voltage, p.energy))
}

/// One row of `channels.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelRow {
    pub host_id: String,
    pub channel_id: String,
    pub series: String,
    pub batch_id: String,
    pub unified_batch_id: String,
    pub shelf_time: String,
    pub test_mode: TestMode,
    pub cycle_count: usize,
    pub first_charge: Option<f64>,
    pub first_discharge: Option<f64>,
    pub first_efficiency: Option<f64>,
    pub first_voltage: Option<f64>,
    pub first_energy: Option<f64>,
    pub cycle2_charge: Option<f64>,
    pub cycle2_discharge: Option<f64>,
    pub cycle3_charge: Option<f64>,
    pub cycle3_discharge: Option<f64>,
    pub cycle4_charge: Option<f64>,
    pub cycle4_discharge: Option<f64>,
    pub cycle5_charge: Option<f64>,
    pub cycle5_discharge: Option<f64>,
    pub cycle6_charge: Option<f64>,
    pub cycle6_discharge: Option<f64>,
    pub cycle7_charge: Option<f64>,
    pub cycle7_discharge: Option<f64>,
    pub rate_cycle_index: Option<usize>,
    pub rate_charge: Option<f64>,
    pub rate_discharge: Option<f64>,
    pub rate_efficiency: Option<f64>,
    pub rate_ratio: Option<f64>,
    pub rate_status: RateStatus,
    pub retention_baseline_index: Option<usize>,
    pub capacity_retention: Option<f64>,
    pub voltage_retention: Option<f64>,
    pub energy_retention: Option<f64>,
    pub capacity_retention_100: Option<f64>,
    pub voltage_retention_100: Option<f64>,
    pub energy_retention_100: Option<f64>,
    pub capacity_retention_200: Option<f64>,
    pub voltage_retention_200: Option<f64>,
    pub energy_retention_200: Option<f64>,
    pub voltage_decay_mv_per_cycle: Option<f64>,
    pub source_file: String,
}

impl From<&ChannelSummary> for ChannelRow {
    fn from(c: &ChannelSummary) -> Self {
        let retention = c.retention;
        let current = point(retention.map(|r| r.current));
        let at_100 = point(retention.and_then(|r| r.at_100));
        let at_200 = point(retention.and_then(|r| r.at_200));
        let early = &c.early;

        Self {
            host_id: c.channel.host_id.clone(),
            channel_id: c.channel.channel_id.clone(),
            series: c.series.clone(),
            batch_id: c.batch_id.clone(),
            unified_batch_id: c.unified_batch_id.clone(),
            shelf_time: c.shelf_time.clone(),
            test_mode: c.test_mode,
            cycle_count: c.cycle_count,
            first_charge: c.first.charge,
            first_discharge: c.first.discharge,
            first_efficiency: c.first.efficiency,
            first_voltage: c.first.voltage,
            first_energy: c.first.energy,
            cycle2_charge: early.charge_at(2),
            cycle2_discharge: early.discharge_at(2),
            cycle3_charge: early.charge_at(3),
            cycle3_discharge: early.discharge_at(3),
            cycle4_charge: early.charge_at(4),
            cycle4_discharge: early.discharge_at(4),
            cycle5_charge: early.charge_at(5),
            cycle5_discharge: early.discharge_at(5),
            cycle6_charge: early.charge_at(6),
            cycle6_discharge: early.discharge_at(6),
            cycle7_charge: early.charge_at(7),
            cycle7_discharge: early.discharge_at(7),
            rate_cycle_index: c.rate.index,
            rate_charge: c.rate.charge,
            rate_discharge: c.rate.discharge,
            rate_efficiency: c.rate.efficiency,
            rate_ratio: c.rate.ratio,
            rate_status: c.rate.status,
            retention_baseline_index: retention.map(|r| r.baseline_index),
            capacity_retention: current.0,
            voltage_retention: current.1,
            energy_retention: current.2,
            capacity_retention_100: at_100.0,
            voltage_retention_100: at_100.1,
            energy_retention_100: at_100.2,
            capacity_retention_200: at_200.0,
            voltage_retention_200: at_200.1,
            energy_retention_200: at_200.2,
            voltage_decay_mv_per_cycle: retention.and_then(|r| r.voltage_decay_mv_per_cycle),
            source_file: c.source_file.clone(),
        }
    }
}

/// One row of `statistics.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsRow {
    pub series: String,
    pub unified_batch_id: String,
    pub shelf_time: String,
    pub total_count: usize,
    pub valid_count: usize,
    pub mean_first_charge: Option<f64>,
    pub mean_first_discharge: Option<f64>,
    pub mean_first_efficiency: Option<f64>,
    pub mean_first_voltage: Option<f64>,
    pub mean_first_energy: Option<f64>,
    pub mean_cycle2_charge: Option<f64>,
    pub mean_cycle2_discharge: Option<f64>,
    pub mean_cycle3_charge: Option<f64>,
    pub mean_cycle3_discharge: Option<f64>,
    pub mean_cycle4_charge: Option<f64>,
    pub mean_cycle4_discharge: Option<f64>,
    pub mean_cycle5_charge: Option<f64>,
    pub mean_cycle5_discharge: Option<f64>,
    pub mean_cycle6_charge: Option<f64>,
    pub mean_cycle6_discharge: Option<f64>,
    pub mean_cycle7_charge: Option<f64>,
    pub mean_cycle7_discharge: Option<f64>,
    pub rate_valid_count: usize,
    pub batch_rate_status: Option<BatchRateStatus>,
    pub reference_host_id: Option<String>,
    pub reference_channel_id: Option<String>,
    pub reference_method: Option<ReferenceMethod>,
    pub reference_rate_cycle_index: Option<usize>,
    pub reference_rate_charge: Option<f64>,
    pub reference_rate_discharge: Option<f64>,
    pub reference_rate_efficiency: Option<f64>,
    pub reference_rate_ratio: Option<f64>,
    pub reference_cycle_count: Option<usize>,
    pub reference_capacity_retention: Option<f64>,
    pub reference_voltage_retention: Option<f64>,
    pub reference_energy_retention: Option<f64>,
    pub reference_capacity_retention_100: Option<f64>,
    pub reference_voltage_retention_100: Option<f64>,
    pub reference_energy_retention_100: Option<f64>,
    pub reference_capacity_retention_200: Option<f64>,
    pub reference_voltage_retention_200: Option<f64>,
    pub reference_energy_retention_200: Option<f64>,
    pub reference_voltage_decay_mv_per_cycle: Option<f64>,
}

impl From<&BatchStatistics> for StatisticsRow {
    fn from(s: &BatchStatistics) -> Self {
        let m = &s.means;
        let r = s.reference.as_ref();
        let retention = r.and_then(|r| r.retention);
        let current = point(retention.map(|x| x.current));
        let at_100 = point(retention.and_then(|x| x.at_100));
        let at_200 = point(retention.and_then(|x| x.at_200));

        Self {
            series: s.key.series.clone(),
            unified_batch_id: s.key.unified_batch.clone(),
            shelf_time: s.shelf_time.clone(),
            total_count: s.total_count,
            valid_count: s.valid_count,
            mean_first_charge: m.first_charge,
            mean_first_discharge: m.first_discharge,
            mean_first_efficiency: m.first_efficiency,
            mean_first_voltage: m.first_voltage,
            mean_first_energy: m.first_energy,
            mean_cycle2_charge: m.early_charge[0],
            mean_cycle2_discharge: m.early_discharge[0],
            mean_cycle3_charge: m.early_charge[1],
            mean_cycle3_discharge: m.early_discharge[1],
            mean_cycle4_charge: m.early_charge[2],
            mean_cycle4_discharge: m.early_discharge[2],
            mean_cycle5_charge: m.early_charge[3],
            mean_cycle5_discharge: m.early_discharge[3],
            mean_cycle6_charge: m.early_charge[4],
            mean_cycle6_discharge: m.early_discharge[4],
            mean_cycle7_charge: m.early_charge[5],
            mean_cycle7_discharge: m.early_discharge[5],
            rate_valid_count: s.rate_valid_count,
            batch_rate_status: s.batch_rate_status,
            reference_host_id: r.map(|r| r.channel.host_id.clone()),
            reference_channel_id: r.map(|r| r.channel.channel_id.clone()),
            reference_method: r.map(|r| r.method),
            reference_rate_cycle_index: r.and_then(|r| r.rate.index),
            reference_rate_charge: r.and_then(|r| r.rate.charge),
            reference_rate_discharge: r.and_then(|r| r.rate.discharge),
            reference_rate_efficiency: r.and_then(|r| r.rate.efficiency),
            reference_rate_ratio: r.and_then(|r| r.rate.ratio),
            reference_cycle_count: r.map(|r| r.cycle_count),
            reference_capacity_retention: current.0,
            reference_voltage_retention: current.1,
            reference_energy_retention: current.2,
            reference_capacity_retention_100: at_100.0,
            reference_voltage_retention_100: at_100.1,
            reference_energy_retention_100: at_100.2,
            reference_capacity_retention_200: at_200.0,
            reference_voltage_retention_200: at_200.1,
            reference_energy_retention_200: at_200.2,
            reference_voltage_decay_mv_per_cycle: retention
                .and_then(|x| x.voltage_decay_mv_per_cycle),
        }
    }
}

/// One row of `needs_retest.csv`: a channel of a batch that lost every
/// channel to outlier filtering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetestRow {
    pub series: String,
    pub unified_batch_id: String,
    pub cause: InconsistencyCause,
    pub batch_channels: usize,
    pub batch_severe: usize,
    pub host_id: String,
    pub channel_id: String,
    pub batch_id: String,
    pub test_mode: TestMode,
    pub first_discharge: Option<f64>,
    pub first_efficiency: Option<f64>,
    pub rate_status: RateStatus,
    pub rate_efficiency: Option<f64>,
    pub source_file: String,
}

impl RetestRow {
    pub fn rows(batch: &InconsistentBatch<'_>) -> Vec<Self> {
        batch
            .channels
            .iter()
            .map(|c| Self {
                series: batch.key.series.clone(),
                unified_batch_id: batch.key.unified_batch.clone(),
                cause: batch.cause,
                batch_channels: batch.channels.len(),
                batch_severe: batch.severe_count,
                host_id: c.channel.host_id.clone(),
                channel_id: c.channel.channel_id.clone(),
                batch_id: c.batch_id.clone(),
                test_mode: c.test_mode,
                first_discharge: c.first.discharge,
                first_efficiency: c.first.efficiency,
                rate_status: c.rate.status,
                rate_efficiency: c.rate.efficiency,
                source_file: c.source_file.clone(),
            })
            .collect()
    }
}

/// One row of `single_cycle.csv` or `abnormal_first_cycle.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenedRow {
    pub host_id: String,
    pub channel_id: String,
    pub series: String,
    pub batch_id: String,
    pub test_mode: TestMode,
    pub cycle_count: usize,
    pub first_charge: Option<f64>,
    pub first_discharge: Option<f64>,
    pub first_efficiency: Option<f64>,
    pub reason: String,
    pub source_file: String,
}

impl From<&ScreenedChannel> for ScreenedRow {
    fn from(s: &ScreenedChannel) -> Self {
        let c = &s.summary;
        Self {
            host_id: c.channel.host_id.clone(),
            channel_id: c.channel.channel_id.clone(),
            series: c.series.clone(),
            batch_id: c.batch_id.clone(),
            test_mode: c.test_mode,
            cycle_count: c.cycle_count,
            first_charge: c.first.charge,
            first_discharge: c.first.discharge,
            first_efficiency: c.first.efficiency,
            reason: s.reason.to_string(),
            source_file: c.source_file.clone(),
        }
    }
}
