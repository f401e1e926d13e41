//! Output tables and the run report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::FailedBatch;
use crate::config::OutlierMethod;
use crate::error::ExportError;
use crate::pipeline::{Consolidation, PreparedRun};
use crate::reference::ReferenceDiagnostics;
use crate::types::BatchKey;

pub mod rows;

use rows::{ChannelRow, RetestRow, ScreenedRow, StatisticsRow};

pub const CHANNELS_FILE: &str = "channels.csv";
pub const STATISTICS_FILE: &str = "statistics.csv";
pub const RETEST_FILE: &str = "needs_retest.csv";
pub const SINGLE_CYCLE_FILE: &str = "single_cycle.csv";
pub const ABNORMAL_FILE: &str = "abnormal_first_cycle.csv";
pub const SKIPPED_FILE: &str = "skipped_files.csv";
pub const REPORT_FILE: &str = "run_report.json";

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunCounts {
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub single_cycle: usize,
    pub abnormal_first_cycle: usize,
    pub channels: usize,
    pub filtered_channels: usize,
    pub batches: usize,
    pub statistics_rows: usize,
    pub inconsistent_batches: usize,
    pub failed_batches: usize,
}

/// Machine-readable summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input: String,
    pub outlier_method: OutlierMethod,
    pub counts: RunCounts,
    pub fully_removed: Vec<BatchKey>,
    pub failed_batches: Vec<FailedBatch>,
    pub diagnostics: Vec<ReferenceDiagnostics>,
}

impl RunReport {
    pub fn new(
        input: &Path,
        outlier_method: OutlierMethod,
        run: &PreparedRun,
        consolidation: &Consolidation<'_>,
    ) -> Self {
        let report = &consolidation.report;
        Self {
            run_id: run.run_id,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: run.started_at,
            finished_at: Utc::now(),
            input: input.display().to_string(),
            outlier_method,
            counts: RunCounts {
                files_loaded: run.files_loaded,
                files_skipped: run.skipped.len(),
                single_cycle: run.single_cycle().count(),
                abnormal_first_cycle: run.abnormal_first_cycle().count(),
                channels: run.channels.len(),
                filtered_channels: consolidation.filtered.survivor_count(),
                batches: consolidation.groups.len(),
                statistics_rows: report.statistics.len(),
                inconsistent_batches: report.inconsistent.len(),
                failed_batches: report.failed.len(),
            },
            fully_removed: consolidation.filtered.fully_removed.iter().cloned().collect(),
            failed_batches: report.failed.clone(),
            diagnostics: report.diagnostics.clone(),
        }
    }
}

/// Writes run outputs into one directory.
pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    pub fn new(dir: &Path) -> Result<Self, ExportError> {
        fs::create_dir_all(dir)
            .map_err(|e| ExportError::NotWritable(format!("{}: {}", dir.display(), e)))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every table plus the run report. Returns the written paths.
    pub fn write_all(
        &self,
        run: &PreparedRun,
        consolidation: &Consolidation<'_>,
        report: &RunReport,
    ) -> Result<Vec<PathBuf>, ExportError> {
        let filtered = consolidation
            .filtered
            .filtered
            .values()
            .flatten()
            .map(|c| ChannelRow::from(*c));
        let statistics = consolidation
            .report
            .statistics
            .iter()
            .map(StatisticsRow::from);
        let retest = consolidation
            .report
            .inconsistent
            .iter()
            .flat_map(RetestRow::rows);

        let written = vec![
            self.write_csv(CHANNELS_FILE, filtered)?,
            self.write_csv(STATISTICS_FILE, statistics)?,
            self.write_csv(RETEST_FILE, retest)?,
            self.write_csv(SINGLE_CYCLE_FILE, run.single_cycle().map(ScreenedRow::from))?,
            self.write_csv(ABNORMAL_FILE, run.abnormal_first_cycle().map(ScreenedRow::from))?,
            self.write_csv(SKIPPED_FILE, run.skipped.iter())?,
            self.write_json(REPORT_FILE, report)?,
        ];

        info!(dir = %self.dir.display(), files = written.len(), "Outputs written");
        Ok(written)
    }

    /// Write one CSV table. Headers come from the row type.
    pub fn write_csv<T, I>(&self, name: &str, rows: I) -> Result<PathBuf, ExportError>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let path = self.dir.join(name);
        let mut writer = csv::Writer::from_path(&path)?;
        let mut count = 0;
        for row in rows {
            writer.serialize(row)?;
            count += 1;
        }
        writer.flush()?;
        debug!(file = %path.display(), rows = count, "Table written");
        Ok(path)
    }

    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, ExportError> {
        let path = self.dir.join(name);
        let content = serde_json::to_string_pretty(value)?;
        fs::write(&path, content)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::loader::SkippedFile;
    use crate::metrics::test_support::channel;
    use crate::metrics::ScreenReason;
    use crate::pipeline::{Pipeline, ScreenedChannel};

    fn prepared() -> PreparedRun {
        let config = Config::default();
        let mut run = Pipeline::new(&config).prepare_datasets(Vec::new());
        run.channels = [300.0, 302.0, 298.0, 301.0, 150.0]
            .iter()
            .enumerate()
            .map(|(i, v)| channel(&format!("{}-1", i + 1), *v))
            .collect();
        run.screened.push(ScreenedChannel {
            summary: channel("9-9", 300.0),
            reason: ScreenReason::SingleCycle,
        });
        run.skipped.push(SkippedFile {
            path: "bad.csv".to_string(),
            reason: "No cycle rows in bad.csv".to_string(),
        });
        run
    }

    #[test]
    fn test_write_all() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let pipeline = Pipeline::new(&config);
        let run = prepared();
        let consolidation = pipeline.consolidate(&run);
        let report = RunReport::new(dir.path(), config.outlier.method, &run, &consolidation);

        let exporter = Exporter::new(&dir.path().join("out")).unwrap();
        let written = exporter.write_all(&run, &consolidation, &report).unwrap();
        assert_eq!(written.len(), 7);
        assert!(written.iter().all(|p| p.exists()));

        let channels = fs::read_to_string(exporter.dir().join(CHANNELS_FILE)).unwrap();
        let mut lines = channels.lines();
        assert!(lines.next().unwrap().starts_with("host_id,channel_id,series"));
        assert_eq!(lines.count(), 4);

        let statistics = fs::read_to_string(exporter.dir().join(STATISTICS_FILE)).unwrap();
        assert!(statistics.contains("mean_first_discharge"));
        assert!(statistics.contains("300.25"));

        let single = fs::read_to_string(exporter.dir().join(SINGLE_CYCLE_FILE)).unwrap();
        assert!(single.contains("single cycle"));

        let json = fs::read_to_string(exporter.dir().join(REPORT_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["counts"]["channels"], 5);
        assert_eq!(value["counts"]["filtered_channels"], 4);
        assert_eq!(value["counts"]["files_skipped"], 1);
        assert_eq!(value["run_id"], run.run_id.to_string());
    }

    #[test]
    fn test_unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            Exporter::new(&file.join("sub")),
            Err(ExportError::NotWritable(_))
        ));
    }
}
