//! Cycle file discovery and loading.
//!
//! Each input file is a CSV export of one channel's cycle table. Files that
//! cannot be read are skipped and reported; they never abort a run.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::error::{ConfigError, LoadError};
use crate::types::{ChannelDataset, CycleRecord};

pub mod filename;

use filename::FilenameParser;

/// A file that was found but could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Result of loading an input tree.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub datasets: Vec<ChannelDataset>,
    pub skipped: Vec<SkippedFile>,
}

/// Column positions resolved from a CSV header row.
struct ColumnIndex {
    cycle: Option<usize>,
    charge: usize,
    discharge: usize,
    voltage: usize,
    energy: usize,
}

/// Loads channel datasets from cycle CSV exports.
pub struct CycleLoader<'a> {
    config: &'a LoaderConfig,
    parser: FilenameParser,
    excluded: Vec<PathBuf>,
}

impl<'a> CycleLoader<'a> {
    pub fn new(config: &'a LoaderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            parser: FilenameParser::new(config)?,
            excluded: Vec::new(),
        })
    }

    /// Leave everything under `dir` out of discovery. Used for the run's own
    /// output directory when it sits inside the input tree.
    pub fn excluding(mut self, dir: &Path) -> Self {
        self.excluded.push(normalized(dir));
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        let path = normalized(path);
        self.excluded.iter().any(|dir| path.starts_with(dir))
    }

    /// Find input files. A file path is returned as-is; a directory is
    /// searched with the configured glob.
    pub fn discover(&self, input: &Path) -> Result<Vec<PathBuf>, LoadError> {
        if !input.exists() {
            return Err(LoadError::InputNotFound(input.display().to_string()));
        }
        if input.is_file() {
            return Ok(vec![input.to_path_buf()]);
        }

        let root = glob::Pattern::escape(&input.to_string_lossy());
        let pattern = format!("{}/{}", root.trim_end_matches('/'), self.config.file_pattern);

        let mut files = Vec::new();
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(path) if self.is_excluded(&path) => {
                    debug!(file = %path.display(), "Skipping excluded path");
                }
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Unreadable path during discovery"),
            }
        }
        files.sort();

        debug!(pattern = %pattern, count = files.len(), "Discovered input files");
        Ok(files)
    }

    /// Load one file into a channel dataset.
    pub fn load_file(&self, path: &Path) -> Result<ChannelDataset, LoadError> {
        let metadata = self.parser.parse(path)?;
        let cycles = self.read_cycles(path)?;
        Ok(ChannelDataset {
            source_file: path.display().to_string(),
            metadata,
            cycles,
        })
    }

    /// Discover and load every file under `input`.
    pub fn load_all(&self, input: &Path) -> Result<LoadReport, LoadError> {
        let files = self.discover(input)?;
        let mut report = LoadReport::default();

        for path in files {
            match self.load_file(&path) {
                Ok(dataset) => report.datasets.push(dataset),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping file");
                    report.skipped.push(SkippedFile {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            loaded = report.datasets.len(),
            skipped = report.skipped.len(),
            "Input loaded"
        );
        Ok(report)
    }

    /// Read the cycle table of one CSV export.
    pub fn read_cycles(&self, path: &Path) -> Result<Vec<CycleRecord>, LoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)?;

        let file = path.display().to_string();
        let headers = reader.headers()?.clone();
        let columns = self.resolve_columns(&headers, &file)?;

        let mut cycles = Vec::new();
        for (row, result) in reader.records().enumerate() {
            let record = result?;
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }

            let field = |idx: usize, name: &str| -> Result<f64, LoadError> {
                let raw = record.get(idx).unwrap_or("");
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| LoadError::InvalidValue {
                        column: name.to_string(),
                        row: row + 1,
                        value: raw.to_string(),
                    })
            };

            let names = &self.config.columns;
            let cycle_index = match columns.cycle {
                Some(idx) => {
                    let value = field(idx, &names.cycle)?;
                    if value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
                        return Err(LoadError::InvalidValue {
                            column: names.cycle.clone(),
                            row: row + 1,
                            value: value.to_string(),
                        });
                    }
                    value as u32
                }
                None => cycles.len() as u32,
            };

            cycles.push(CycleRecord {
                cycle_index,
                charge_capacity: field(columns.charge, &names.charge_capacity)?,
                discharge_capacity: field(columns.discharge, &names.discharge_capacity)?,
                median_discharge_voltage: field(columns.voltage, &names.median_discharge_voltage)?,
                discharge_energy: field(columns.energy, &names.discharge_energy)?,
            });
        }

        if cycles.is_empty() {
            return Err(LoadError::Empty(file));
        }

        // The last row of a running test is an incomplete cycle.
        if self.config.drop_trailing_cycle && cycles.len() > 1 {
            cycles.pop();
        }

        Ok(cycles)
    }

    fn resolve_columns(
        &self,
        headers: &csv::StringRecord,
        file: &str,
    ) -> Result<ColumnIndex, LoadError> {
        let find = |name: &str| {
            headers.iter().position(|h| {
                h.trim_start_matches('\u{feff}')
                    .trim()
                    .eq_ignore_ascii_case(name.trim())
            })
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| LoadError::MissingColumn {
                file: file.to_string(),
                column: name.to_string(),
            })
        };

        let names = &self.config.columns;
        Ok(ColumnIndex {
            cycle: find(&names.cycle),
            charge: require(&names.charge_capacity)?,
            discharge: require(&names.discharge_capacity)?,
            voltage: require(&names.median_discharge_voltage)?,
            energy: require(&names.discharge_energy)?,
        })
    }
}

/// Canonical form when the path exists, so relative and absolute spellings
/// of the same directory compare equal.
fn normalized(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
