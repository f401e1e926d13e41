//! Configuration management for cellqc.
//!
//! Every threshold, weight and strategy selector the pipeline consumes lives
//! here. A `Config` is loaded once, validated, and then passed by reference
//! into every component; nothing reads configuration from ambient state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::{ReferenceMethod, ScalarMetric, TestMode};

pub mod paths;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the config file (set after loading)
    #[serde(skip)]
    pub path: PathBuf,

    /// Rate-cycle location and status thresholds
    #[serde(default)]
    pub rate: RateThresholds,

    /// Retention calculation
    #[serde(default)]
    pub retention: RetentionConfig,

    /// First-cycle screening before consolidation
    #[serde(default)]
    pub screening: ScreeningConfig,

    /// Outlier rejection
    #[serde(default)]
    pub outlier: OutlierConfig,

    /// Reference channel selection
    #[serde(default)]
    pub reference: ReferenceConfig,

    /// Batch statistics
    #[serde(default)]
    pub aggregate: AggregateConfig,

    /// Cycle file loading and filename parsing
    #[serde(default)]
    pub loader: LoaderConfig,
}

impl Config {
    /// Load configuration from the default path or environment.
    ///
    /// A missing file is not an error: defaults are used.
    pub fn load() -> Result<Self> {
        let config_path = paths::config_file();
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.path = path.to_path_buf();

        Ok(config)
    }

    /// Load from an explicit path if given, otherwise from the default location.
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(Path::new(path)),
            None => Self::load(),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate.validate()?;
        self.retention.validate()?;
        self.screening.validate()?;
        self.outlier.validate()?;
        self.reference.validate()?;
        self.aggregate.validate()?;
        self.loader.validate()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            rate: RateThresholds::default(),
            retention: RetentionConfig::default(),
            screening: ScreeningConfig::default(),
            outlier: OutlierConfig::default(),
            reference: ReferenceConfig::default(),
            aggregate: AggregateConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn ensure_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(invalid(format!("{} must be positive, got {}", name, value)));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Rate cycle
// ---------------------------------------------------------------------------

/// Thresholds for locating and classifying the 1C cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateThresholds {
    /// Rate discharge must fall below this fraction of the first discharge
    #[serde(default = "default_ratio_threshold")]
    pub ratio_threshold: f64,

    /// Rate discharge must be at least this much lower than the first (mAh/g)
    #[serde(default = "default_discharge_diff_threshold")]
    pub discharge_diff_threshold: f64,

    /// Last cycle index (0-based) examined as a rate-cycle candidate
    #[serde(default = "default_max_scan_index")]
    pub max_scan_index: usize,

    /// Index used when no candidate qualifies
    #[serde(default = "default_fallback_index")]
    pub fallback_index: usize,

    /// Rate charge above this is overcharge (mAh/g)
    #[serde(default = "default_overcharge_threshold")]
    pub overcharge_threshold: f64,

    /// Rate efficiency below this is very low (%)
    #[serde(default = "default_very_low_efficiency")]
    pub very_low_efficiency_threshold: f64,

    /// Rate efficiency below this is low (%)
    #[serde(default = "default_low_efficiency")]
    pub low_efficiency_threshold: f64,
}

fn default_ratio_threshold() -> f64 {
    0.85
}

fn default_discharge_diff_threshold() -> f64 {
    15.0
}

fn default_max_scan_index() -> usize {
    3
}

fn default_fallback_index() -> usize {
    3
}

fn default_overcharge_threshold() -> f64 {
    350.0
}

fn default_very_low_efficiency() -> f64 {
    80.0
}

fn default_low_efficiency() -> f64 {
    85.0
}

impl Default for RateThresholds {
    fn default() -> Self {
        Self {
            ratio_threshold: default_ratio_threshold(),
            discharge_diff_threshold: default_discharge_diff_threshold(),
            max_scan_index: default_max_scan_index(),
            fallback_index: default_fallback_index(),
            overcharge_threshold: default_overcharge_threshold(),
            very_low_efficiency_threshold: default_very_low_efficiency(),
            low_efficiency_threshold: default_low_efficiency(),
        }
    }
}

impl RateThresholds {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ratio_threshold > 0.0 && self.ratio_threshold <= 1.0) {
            return Err(invalid(format!(
                "rate.ratio_threshold must be in (0, 1], got {}",
                self.ratio_threshold
            )));
        }
        if self.discharge_diff_threshold < 0.0 {
            return Err(invalid("rate.discharge_diff_threshold must not be negative"));
        }
        if self.max_scan_index == 0 {
            return Err(invalid("rate.max_scan_index must be at least 1"));
        }
        ensure_positive("rate.overcharge_threshold", self.overcharge_threshold)?;
        if self.very_low_efficiency_threshold >= self.low_efficiency_threshold {
            return Err(invalid(format!(
                "rate.very_low_efficiency_threshold ({}) must be below rate.low_efficiency_threshold ({})",
                self.very_low_efficiency_threshold, self.low_efficiency_threshold
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Retention calculation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Minimum number of cycles before retention is reported
    #[serde(default = "default_min_cycle_count")]
    pub min_cycle_count: usize,
}

fn default_min_cycle_count() -> usize {
    5
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            min_cycle_count: default_min_cycle_count(),
        }
    }
}

impl RetentionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_cycle_count < 2 {
            return Err(invalid("retention.min_cycle_count must be at least 2"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Screening
// ---------------------------------------------------------------------------

/// Limits that mark a first cycle as abnormal (likely a bad cell or a
/// mis-entered active mass). Abnormal channels never reach consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// First charge above this is abnormal (mAh/g)
    #[serde(default = "default_max_first_charge")]
    pub max_first_charge: f64,

    /// First charge below this is abnormal (mAh/g)
    #[serde(default = "default_min_first_charge")]
    pub min_first_charge: f64,

    /// First discharge below this is abnormal (mAh/g)
    #[serde(default = "default_min_first_discharge")]
    pub min_first_discharge: f64,
}

fn default_max_first_charge() -> f64 {
    380.0
}

fn default_min_first_charge() -> f64 {
    200.0
}

fn default_min_first_discharge() -> f64 {
    200.0
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_first_charge: default_max_first_charge(),
            min_first_charge: default_min_first_charge(),
            min_first_discharge: default_min_first_discharge(),
        }
    }
}

impl ScreeningConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_first_charge >= self.max_first_charge {
            return Err(invalid(
                "screening.min_first_charge must be below screening.max_first_charge",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outlier rejection
// ---------------------------------------------------------------------------

/// Outlier strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    Boxplot,
    ZscoreMad,
}

impl std::fmt::Display for OutlierMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutlierMethod::Boxplot => write!(f, "boxplot"),
            OutlierMethod::ZscoreMad => write!(f, "zscore_mad"),
        }
    }
}

/// Outlier rejection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierConfig {
    #[serde(default = "default_outlier_method")]
    pub method: OutlierMethod,

    #[serde(default)]
    pub boxplot: BoxplotConfig,

    #[serde(default)]
    pub zscore_mad: ZScoreMadConfig,
}

fn default_outlier_method() -> OutlierMethod {
    OutlierMethod::Boxplot
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            method: default_outlier_method(),
            boxplot: BoxplotConfig::default(),
            zscore_mad: ZScoreMadConfig::default(),
        }
    }
}

impl OutlierConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.boxplot.validate()?;
        self.zscore_mad.validate()
    }
}

/// One metric filtered by the shrinking boxplot, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxplotMetric {
    pub metric: ScalarMetric,
    /// Filtering stops once the survivors' range is at or below this
    pub max_range: f64,
}

/// Shrinking-boxplot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxplotConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Whisker multiplier applied as `shrink_factor^iteration`
    #[serde(default = "default_shrink_factor")]
    pub shrink_factor: f64,

    #[serde(default = "default_boxplot_metrics")]
    pub metrics: Vec<BoxplotMetric>,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_shrink_factor() -> f64 {
    0.95
}

fn default_boxplot_metrics() -> Vec<BoxplotMetric> {
    vec![
        BoxplotMetric {
            metric: ScalarMetric::FirstDischarge,
            max_range: 10.0,
        },
        BoxplotMetric {
            metric: ScalarMetric::FirstEfficiency,
            max_range: 3.0,
        },
    ]
}

impl Default for BoxplotConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            shrink_factor: default_shrink_factor(),
            metrics: default_boxplot_metrics(),
        }
    }
}

impl BoxplotConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(invalid("outlier.boxplot.max_iterations must be at least 1"));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor <= 1.0) {
            return Err(invalid(format!(
                "outlier.boxplot.shrink_factor must be in (0, 1], got {}",
                self.shrink_factor
            )));
        }
        for m in &self.metrics {
            if !(m.max_range >= 0.0) {
                return Err(invalid(format!(
                    "outlier.boxplot max_range for {} must not be negative",
                    m.metric
                )));
            }
        }
        Ok(())
    }
}

/// Per-metric modified Z-score threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub metric: ScalarMetric,
    pub threshold: f64,
}

/// Robust Z-score + MAD settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZScoreMadConfig {
    /// Normal-consistency constant for the modified Z-score
    #[serde(default = "default_mad_constant")]
    pub mad_constant: f64,

    /// MAD is clamped up to `|median| * min_mad_ratio`
    #[serde(default = "default_min_mad_ratio")]
    pub min_mad_ratio: f64,

    /// Blend with a linearly detrended score
    #[serde(default = "default_true")]
    pub use_detrended: bool,

    /// Minimum present values before the detrended score is used
    #[serde(default = "default_min_samples_for_detrend")]
    pub min_samples_for_detrend: usize,

    #[serde(default = "default_zscore_metrics")]
    pub metrics: Vec<MetricThreshold>,
}

fn default_mad_constant() -> f64 {
    0.6745
}

fn default_min_mad_ratio() -> f64 {
    0.01
}

fn default_min_samples_for_detrend() -> usize {
    10
}

fn default_zscore_metrics() -> Vec<MetricThreshold> {
    vec![
        MetricThreshold {
            metric: ScalarMetric::FirstDischarge,
            threshold: 3.0,
        },
        MetricThreshold {
            metric: ScalarMetric::FirstEfficiency,
            threshold: 2.5,
        },
        MetricThreshold {
            metric: ScalarMetric::FirstVoltage,
            threshold: 3.0,
        },
        MetricThreshold {
            metric: ScalarMetric::FirstEnergy,
            threshold: 3.0,
        },
    ]
}

impl Default for ZScoreMadConfig {
    fn default() -> Self {
        Self {
            mad_constant: default_mad_constant(),
            min_mad_ratio: default_min_mad_ratio(),
            use_detrended: true,
            min_samples_for_detrend: default_min_samples_for_detrend(),
            metrics: default_zscore_metrics(),
        }
    }
}

impl ZScoreMadConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("outlier.zscore_mad.mad_constant", self.mad_constant)?;
        if !(self.min_mad_ratio >= 0.0) {
            return Err(invalid("outlier.zscore_mad.min_mad_ratio must not be negative"));
        }
        if self.min_samples_for_detrend < 3 {
            return Err(invalid(
                "outlier.zscore_mad.min_samples_for_detrend must be at least 3",
            ));
        }
        for m in &self.metrics {
            ensure_positive(&format!("outlier.zscore_mad threshold for {}", m.metric), m.threshold)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reference selection
// ---------------------------------------------------------------------------

/// Reference channel selection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Scoring methods in priority order; the first non-empty pick wins
    #[serde(default = "default_method_priority")]
    pub method_priority: Vec<ReferenceMethod>,

    /// Log a warning when scoring methods pick different channels
    #[serde(default = "default_true")]
    pub warn_on_disagreement: bool,

    #[serde(default)]
    pub traditional: TraditionalConfig,

    #[serde(default)]
    pub pca: PcaConfig,

    #[serde(default)]
    pub curve: CurveConfig,
}

fn default_method_priority() -> Vec<ReferenceMethod> {
    vec![
        ReferenceMethod::CurveRetentionMse,
        ReferenceMethod::Pca,
        ReferenceMethod::Traditional,
    ]
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            method_priority: default_method_priority(),
            warn_on_disagreement: true,
            traditional: TraditionalConfig::default(),
            pca: PcaConfig::default(),
            curve: CurveConfig::default(),
        }
    }
}

impl ReferenceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.method_priority.is_empty() {
            return Err(invalid("reference.method_priority must list at least one method"));
        }
        for (i, method) in self.method_priority.iter().enumerate() {
            if matches!(
                method,
                ReferenceMethod::SoleCandidate | ReferenceMethod::FirstCandidate
            ) {
                return Err(invalid(format!(
                    "reference.method_priority: '{}' is not a scoring method",
                    method
                )));
            }
            if self.method_priority[..i].contains(method) {
                return Err(invalid(format!(
                    "reference.method_priority lists '{}' twice",
                    method
                )));
            }
        }
        self.pca.validate()?;
        self.curve.validate()
    }
}

/// Nearest-to-mean selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraditionalConfig {
    #[serde(default = "default_traditional_metric")]
    pub metric: ScalarMetric,
}

fn default_traditional_metric() -> ScalarMetric {
    ScalarMetric::FirstDischarge
}

impl Default for TraditionalConfig {
    fn default() -> Self {
        Self {
            metric: default_traditional_metric(),
        }
    }
}

/// PCA centroid selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaConfig {
    #[serde(default = "default_pca_features")]
    pub features: Vec<ScalarMetric>,

    #[serde(default = "default_n_components")]
    pub n_components: usize,

    #[serde(default = "default_pca_min_samples")]
    pub min_samples: usize,

    #[serde(default = "default_pca_min_features")]
    pub min_features: usize,
}

fn default_pca_features() -> Vec<ScalarMetric> {
    vec![
        ScalarMetric::FirstDischarge,
        ScalarMetric::FirstVoltage,
        ScalarMetric::Cycle4Discharge,
    ]
}

fn default_n_components() -> usize {
    2
}

fn default_pca_min_samples() -> usize {
    3
}

fn default_pca_min_features() -> usize {
    2
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            features: default_pca_features(),
            n_components: default_n_components(),
            min_samples: default_pca_min_samples(),
            min_features: default_pca_min_features(),
        }
    }
}

impl PcaConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.n_components == 0 {
            return Err(invalid("reference.pca.n_components must be at least 1"));
        }
        if self.min_samples < 2 {
            return Err(invalid("reference.pca.min_samples must be at least 2"));
        }
        if self.min_features == 0 {
            return Err(invalid("reference.pca.min_features must be at least 1"));
        }
        Ok(())
    }
}

/// Curve resampling scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Linear,
    Cubic,
}

/// Per-cycle MSE weighting scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightMethod {
    Constant,
    Linear,
    Exponential,
}

/// Relative weight of each retention metric in the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricWeights {
    #[serde(default = "default_capacity_weight")]
    pub capacity: f64,
    #[serde(default = "default_voltage_weight")]
    pub voltage: f64,
    #[serde(default = "default_energy_weight")]
    pub energy: f64,
}

fn default_capacity_weight() -> f64 {
    0.6
}

fn default_voltage_weight() -> f64 {
    0.1
}

fn default_energy_weight() -> f64 {
    0.3
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            capacity: default_capacity_weight(),
            voltage: default_voltage_weight(),
            energy: default_energy_weight(),
        }
    }
}

/// Late-life emphasis for the curve MSE.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleWeighting {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_weight_method")]
    pub method: WeightMethod,

    #[serde(default = "default_weight_factor")]
    pub factor: f64,

    /// Multiplier applied to the last `late_fraction` of the grid
    #[serde(default = "default_late_emphasis")]
    pub late_emphasis: f64,

    #[serde(default = "default_late_fraction")]
    pub late_fraction: f64,
}

fn default_weight_method() -> WeightMethod {
    WeightMethod::Linear
}

fn default_weight_factor() -> f64 {
    1.0
}

fn default_late_emphasis() -> f64 {
    2.0
}

fn default_late_fraction() -> f64 {
    0.3
}

impl Default for CycleWeighting {
    fn default() -> Self {
        Self {
            enabled: true,
            method: default_weight_method(),
            factor: default_weight_factor(),
            late_emphasis: default_late_emphasis(),
            late_fraction: default_late_fraction(),
        }
    }
}

/// Curve-retention-MSE selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveConfig {
    #[serde(default = "default_curve_min_channels")]
    pub min_channels: usize,

    /// Minimum common grid points across candidates
    #[serde(default = "default_curve_min_cycles")]
    pub min_cycles: usize,

    /// Upper bound on the compared span, in cycles after the baseline
    #[serde(default = "default_curve_max_cycles")]
    pub max_cycles: u32,

    #[serde(default = "default_cycle_step")]
    pub cycle_step: u32,

    #[serde(default = "default_interpolation")]
    pub interpolation: Interpolation,

    #[serde(default = "default_true")]
    pub include_voltage: bool,

    #[serde(default = "default_true")]
    pub include_energy: bool,

    #[serde(default)]
    pub weights: MetricWeights,

    #[serde(default)]
    pub weighting: CycleWeighting,
}

fn default_curve_min_channels() -> usize {
    2
}

fn default_curve_min_cycles() -> usize {
    5
}

fn default_curve_max_cycles() -> u32 {
    800
}

fn default_cycle_step() -> u32 {
    1
}

fn default_interpolation() -> Interpolation {
    Interpolation::Linear
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            min_channels: default_curve_min_channels(),
            min_cycles: default_curve_min_cycles(),
            max_cycles: default_curve_max_cycles(),
            cycle_step: default_cycle_step(),
            interpolation: default_interpolation(),
            include_voltage: true,
            include_energy: true,
            weights: MetricWeights::default(),
            weighting: CycleWeighting::default(),
        }
    }
}

impl CurveConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_channels < 2 {
            return Err(invalid("reference.curve.min_channels must be at least 2"));
        }
        if self.min_cycles < 2 {
            return Err(invalid("reference.curve.min_cycles must be at least 2"));
        }
        if self.cycle_step == 0 {
            return Err(invalid("reference.curve.cycle_step must be at least 1"));
        }
        let w = &self.weights;
        if w.capacity < 0.0 || w.voltage < 0.0 || w.energy < 0.0 {
            return Err(invalid("reference.curve.weights must not be negative"));
        }
        if w.capacity <= 0.0 {
            return Err(invalid("reference.curve.weights.capacity must be positive"));
        }
        let lw = &self.weighting;
        if !(0.0..1.0).contains(&lw.late_fraction) {
            return Err(invalid("reference.curve.weighting.late_fraction must be in [0, 1)"));
        }
        ensure_positive("reference.curve.weighting.late_emphasis", lw.late_emphasis)?;
        if !lw.factor.is_finite() || lw.factor < 0.0 {
            return Err(invalid("reference.curve.weighting.factor must not be negative"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Batch statistics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// Share of severe channels at which an eliminated batch is called a true defect
    #[serde(default = "default_defect_fraction")]
    pub defect_fraction: f64,

    /// Catch panics inside one batch and keep processing the rest
    #[serde(default = "default_true")]
    pub isolate_batch_failures: bool,
}

fn default_defect_fraction() -> f64 {
    0.5
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            defect_fraction: default_defect_fraction(),
            isolate_batch_failures: true,
        }
    }
}

impl AggregateConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.defect_fraction > 0.0 && self.defect_fraction <= 1.0) {
            return Err(invalid("aggregate.defect_fraction must be in (0, 1]"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Column headers in the cycle CSV export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnNames {
    /// Optional; row position is used when the column is absent
    #[serde(default = "default_cycle_column")]
    pub cycle: String,
    #[serde(default = "default_charge_column")]
    pub charge_capacity: String,
    #[serde(default = "default_discharge_column")]
    pub discharge_capacity: String,
    #[serde(default = "default_voltage_column")]
    pub median_discharge_voltage: String,
    #[serde(default = "default_energy_column")]
    pub discharge_energy: String,
}

fn default_cycle_column() -> String {
    "cycle".to_string()
}

fn default_charge_column() -> String {
    "charge_capacity".to_string()
}

fn default_discharge_column() -> String {
    "discharge_capacity".to_string()
}

fn default_voltage_column() -> String {
    "median_discharge_voltage".to_string()
}

fn default_energy_column() -> String {
    "discharge_energy".to_string()
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            cycle: default_cycle_column(),
            charge_capacity: default_charge_column(),
            discharge_capacity: default_discharge_column(),
            median_discharge_voltage: default_voltage_column(),
            discharge_energy: default_energy_column(),
        }
    }
}

/// Assigns a series from substrings of the filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRule {
    pub name: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl SeriesRule {
    fn new(name: &str, include: &[&str], exclude: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Matches when any include token is present (or none are configured)
    /// and no exclude token is.
    pub fn matches(&self, filename: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|p| filename.contains(p.as_str()));
        let excluded = self.exclude.iter().any(|p| filename.contains(p.as_str()));
        included && !excluded
    }
}

/// Test mode assigned when a filename carries a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeToken {
    pub token: String,
    pub mode: TestMode,
}

/// Cycle file loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Glob, relative to the input directory
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,

    /// Treat the final row as an in-progress cycle and discard it
    #[serde(default = "default_true")]
    pub drop_trailing_cycle: bool,

    #[serde(default)]
    pub columns: ColumnNames,

    /// Checked in order; first match wins
    #[serde(default = "default_mode_tokens")]
    pub mode_tokens: Vec<ModeToken>,

    #[serde(default = "default_test_mode")]
    pub default_test_mode: TestMode,

    /// Checked in order; first match wins
    #[serde(default = "default_series_rules")]
    pub series: Vec<SeriesRule>,

    #[serde(default = "default_series")]
    pub default_series: String,

    /// Fallback host ids (whole stem) are truncated to this many characters
    #[serde(default = "default_host_id_max_length")]
    pub host_id_max_length: usize,

    #[serde(default = "default_channel")]
    pub default_channel: String,
}

fn default_file_pattern() -> String {
    "**/*.csv".to_string()
}

fn default_mode_tokens() -> Vec<ModeToken> {
    [
        ("-0.1C-", TestMode::LowRate0p1C),
        ("-0.5C-", TestMode::Other),
        ("-1C-", TestMode::Rate1C),
        ("-BL-", TestMode::Baseline),
        ("-0.33C-", TestMode::Other),
    ]
    .into_iter()
    .map(|(token, mode)| ModeToken {
        token: token.to_string(),
        mode,
    })
    .collect()
}

fn default_test_mode() -> TestMode {
    TestMode::Rate1C
}

fn default_series_rules() -> Vec<SeriesRule> {
    vec![
        SeriesRule::new("G", &["-G-"], &["-M-"]),
        SeriesRule::new("Q3", &["-Q3-"], &[]),
        SeriesRule::new("M", &["-M-"], &[]),
        SeriesRule::new("D", &["-D-"], &[]),
        SeriesRule::new("Z", &["-Z-"], &[]),
    ]
}

fn default_series() -> String {
    "Q3".to_string()
}

fn default_host_id_max_length() -> usize {
    20
}

fn default_channel() -> String {
    "CH-01".to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            file_pattern: default_file_pattern(),
            drop_trailing_cycle: true,
            columns: ColumnNames::default(),
            mode_tokens: default_mode_tokens(),
            default_test_mode: default_test_mode(),
            series: default_series_rules(),
            default_series: default_series(),
            host_id_max_length: default_host_id_max_length(),
            default_channel: default_channel(),
        }
    }
}

impl LoaderConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.file_pattern.trim().is_empty() {
            return Err(invalid("loader.file_pattern must not be empty"));
        }
        for (i, rule) in self.series.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(invalid(format!("loader.series[{}] has empty name", i)));
            }
        }
        for (i, token) in self.mode_tokens.iter().enumerate() {
            if token.token.is_empty() {
                return Err(invalid(format!("loader.mode_tokens[{}] has empty token", i)));
            }
        }
        if self.default_series.trim().is_empty() {
            return Err(invalid("loader.default_series must not be empty"));
        }
        if self.host_id_max_length == 0 {
            return Err(invalid("loader.host_id_max_length must be at least 1"));
        }
        Ok(())
    }
}
