//! Curve-retention-MSE reference selection.
//!
//! Each candidate's retention curve (relative to its own baseline cycle) is
//! resampled onto a shared cycle grid. The candidate whose curves sit closest
//! to the batch mean curve, under a late-weighted MSE, is chosen.

use tracing::trace;

use crate::config::{CurveConfig, CycleWeighting, Interpolation, MetricWeights, WeightMethod};
use crate::types::{ChannelSummary, ReferenceMethod};

use super::MethodPick;

/// Which retention curve to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveMetric {
    Capacity,
    Voltage,
    Energy,
}

/// Retention curves of one channel, keyed by cycles since baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionCurve {
    pub offsets: Vec<f64>,
    pub capacity: Vec<f64>,
    pub voltage: Option<Vec<f64>>,
    pub energy: Option<Vec<f64>>,
}

impl RetentionCurve {
    /// Build the curve from the channel's retention baseline onwards.
    ///
    /// `None` when the baseline is out of range, its discharge is not
    /// positive, or fewer than two points remain.
    pub fn from_channel(channel: &ChannelSummary) -> Option<Self> {
        let baseline = channel.retention_baseline();
        let cycles = channel.cycles.get(baseline..)?;
        if cycles.len() < 2 {
            return None;
        }
        let base = cycles[0];
        if !(base.discharge_capacity > 0.0) {
            return None;
        }

        let indexed: Vec<f64> = cycles
            .iter()
            .map(|c| c.cycle_index as f64 - base.cycle_index as f64)
            .collect();
        let increasing = indexed.windows(2).all(|w| w[1] > w[0]);
        let offsets = if increasing {
            indexed
        } else {
            (0..cycles.len()).map(|i| i as f64).collect()
        };

        let ratio = |value: f64, reference: f64| 100.0 * value / reference;
        let capacity = cycles
            .iter()
            .map(|c| ratio(c.discharge_capacity, base.discharge_capacity))
            .collect();
        let voltage = (base.median_discharge_voltage > 0.0).then(|| {
            cycles
                .iter()
                .map(|c| ratio(c.median_discharge_voltage, base.median_discharge_voltage))
                .collect()
        });
        let energy = (base.discharge_energy > 0.0).then(|| {
            cycles
                .iter()
                .map(|c| ratio(c.discharge_energy, base.discharge_energy))
                .collect()
        });

        Some(Self {
            offsets,
            capacity,
            voltage,
            energy,
        })
    }

    pub fn values(&self, metric: CurveMetric) -> Option<&[f64]> {
        match metric {
            CurveMetric::Capacity => Some(&self.capacity),
            CurveMetric::Voltage => self.voltage.as_deref(),
            CurveMetric::Energy => self.energy.as_deref(),
        }
    }

    pub fn span(&self) -> f64 {
        self.offsets.last().copied().unwrap_or(0.0)
    }
}

/// Shared grid `0, step, 2*step, ...` up to `end`.
pub fn cycle_grid(end: f64, step: u32) -> Vec<f64> {
    let step = step.max(1) as f64;
    let count = (end / step).floor().max(0.0) as usize + 1;
    (0..count).map(|i| i as f64 * step).collect()
}

/// Piecewise-linear interpolation; `xs` must be strictly increasing.
pub fn interpolate_linear(xs: &[f64], ys: &[f64], grid: &[f64]) -> Vec<f64> {
    grid.iter()
        .map(|&x| {
            let upper = xs.partition_point(|&v| v < x).clamp(1, xs.len() - 1);
            let (x0, x1) = (xs[upper - 1], xs[upper]);
            let (y0, y1) = (ys[upper - 1], ys[upper]);
            y0 + (y1 - y0) * (x - x0) / (x1 - x0)
        })
        .collect()
}

/// Natural cubic spline interpolation; `xs` must be strictly increasing and
/// hold at least three points.
pub fn interpolate_cubic(xs: &[f64], ys: &[f64], grid: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();

    // Tridiagonal system for the interior second derivatives
    let mut diag = vec![0.0; n];
    let mut rhs = vec![0.0; n];
    for i in 1..n - 1 {
        diag[i] = 2.0 * (h[i - 1] + h[i]);
        rhs[i] = 6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
    }
    for i in 2..n - 1 {
        let m = h[i - 1] / diag[i - 1];
        diag[i] -= m * h[i - 1];
        rhs[i] -= m * rhs[i - 1];
    }
    let mut second = vec![0.0; n];
    for i in (1..n - 1).rev() {
        second[i] = (rhs[i] - h[i] * second[i + 1]) / diag[i];
    }

    grid.iter()
        .map(|&x| {
            let i = xs.partition_point(|&v| v <= x).clamp(1, n - 1) - 1;
            let (a, b) = (xs[i + 1] - x, x - xs[i]);
            let hi = h[i];
            second[i] * a.powi(3) / (6.0 * hi)
                + second[i + 1] * b.powi(3) / (6.0 * hi)
                + (ys[i] / hi - second[i] * hi / 6.0) * a
                + (ys[i + 1] / hi - second[i + 1] * hi / 6.0) * b
        })
        .collect()
}

fn resample(method: Interpolation, xs: &[f64], ys: &[f64], grid: &[f64]) -> Vec<f64> {
    match method {
        Interpolation::Cubic if xs.len() >= 3 => interpolate_cubic(xs, ys, grid),
        _ => interpolate_linear(xs, ys, grid),
    }
}

/// Per-grid-point weights, normalized to sum to the grid length.
pub fn cycle_weights(n: usize, weighting: &CycleWeighting) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if !weighting.enabled {
        return vec![1.0; n];
    }

    let denominator = (n.max(2) - 1) as f64;
    let mut weights: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64 / denominator;
            match weighting.method {
                WeightMethod::Constant => 1.0,
                WeightMethod::Linear => 1.0 + weighting.factor * t,
                WeightMethod::Exponential => (weighting.factor * t).exp(),
            }
        })
        .collect();

    if n > 10 && weighting.late_emphasis > 1.0 {
        let start = (n as f64 * (1.0 - weighting.late_fraction)).floor() as usize;
        for w in weights.iter_mut().skip(start) {
            *w *= weighting.late_emphasis;
        }
    }

    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        let scale = n as f64 / total;
        for w in &mut weights {
            *w *= scale;
        }
    }
    weights
}

/// Composite weights for (capacity, voltage, energy), renormalized over the
/// metrics in use so they sum to one.
pub fn composite_weights(weights: &MetricWeights, voltage: bool, energy: bool) -> (f64, f64, f64) {
    let v = if voltage { weights.voltage } else { 0.0 };
    let e = if energy { weights.energy } else { 0.0 };
    let total = weights.capacity + v + e;
    if !(total > 0.0) {
        return (1.0, 0.0, 0.0);
    }
    (weights.capacity / total, v / total, e / total)
}

/// Weighted MSE of every curve against the pointwise mean curve.
pub fn weighted_mse(curves: &[Vec<f64>], weights: &[f64]) -> Vec<f64> {
    let Some(first) = curves.first() else {
        return Vec::new();
    };
    let points = first.len();
    let mean_curve: Vec<f64> = (0..points)
        .map(|j| curves.iter().map(|c| c[j]).sum::<f64>() / curves.len() as f64)
        .collect();
    let weight_sum: f64 = weights.iter().sum();

    curves
        .iter()
        .map(|curve| {
            let sum: f64 = curve
                .iter()
                .zip(&mean_curve)
                .zip(weights)
                .map(|((c, m), w)| w * (c - m).powi(2))
                .sum();
            sum / weight_sum
        })
        .collect()
}

/// Pick the candidate with the lowest composite curve MSE.
pub fn lowest_curve_mse(
    candidates: &[&ChannelSummary],
    config: &CurveConfig,
) -> Option<MethodPick> {
    if candidates.len() < config.min_channels {
        return None;
    }

    let curves: Vec<(usize, RetentionCurve)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| RetentionCurve::from_channel(c).map(|curve| (i, curve)))
        .collect();
    if curves.len() < 2 {
        trace!(curves = curves.len(), "Too few retention curves");
        return None;
    }

    let end = curves
        .iter()
        .map(|(_, c)| c.span())
        .fold(f64::INFINITY, f64::min)
        .min(config.max_cycles as f64);
    let grid = cycle_grid(end, config.cycle_step);
    if grid.len() < config.min_cycles {
        trace!(points = grid.len(), "Common cycle span too short");
        return None;
    }

    let use_voltage = config.include_voltage && curves.iter().all(|(_, c)| c.voltage.is_some());
    let use_energy = config.include_energy && curves.iter().all(|(_, c)| c.energy.is_some());

    let resampled = |metric: CurveMetric| -> Vec<Vec<f64>> {
        curves
            .iter()
            .filter_map(|(_, c)| {
                c.values(metric)
                    .map(|ys| resample(config.interpolation, &c.offsets, ys, &grid))
            })
            .collect()
    };

    let weights = cycle_weights(grid.len(), &config.weighting);
    let (wc, wv, we) = composite_weights(&config.weights, use_voltage, use_energy);

    let capacity = weighted_mse(&resampled(CurveMetric::Capacity), &weights);
    let voltage = if use_voltage {
        weighted_mse(&resampled(CurveMetric::Voltage), &weights)
    } else {
        vec![0.0; curves.len()]
    };
    let energy = if use_energy {
        weighted_mse(&resampled(CurveMetric::Energy), &weights)
    } else {
        vec![0.0; curves.len()]
    };

    let mut best: Option<MethodPick> = None;
    for (k, (index, _)) in curves.iter().enumerate() {
        let score = wc * capacity[k] + wv * voltage[k] + we * energy[k];
        if !score.is_finite() {
            continue;
        }
        if best.map_or(true, |b| score < b.score) {
            best = Some(MethodPick {
                method: ReferenceMethod::CurveRetentionMse,
                index: *index,
                score,
            });
        }
    }

    trace!(
        curves = curves.len(),
        grid_points = grid.len(),
        voltage = use_voltage,
        energy = use_energy,
        pick = ?best.map(|b| b.index),
        "Curve scoring complete"
    );
    best
}
