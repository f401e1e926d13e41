//! End-to-end consolidation run.
//!
//! Loading and summarizing produce an owned arena of channel summaries;
//! consolidation then works on borrowed, grouped views of that arena.

use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::aggregate::{AggregateReport, BatchStatisticsAggregator};
use crate::config::Config;
use crate::error::CellQcResult;
use crate::loader::{CycleLoader, SkippedFile};
use crate::metrics::{screen, ChannelSummarizer, ScreenReason};
use crate::outlier::{group_batches, Batches, FilterOutcome};
use crate::types::{ChannelDataset, ChannelSummary};

/// A channel held out of consolidation by screening.
#[derive(Debug, Clone)]
pub struct ScreenedChannel {
    pub summary: ChannelSummary,
    pub reason: ScreenReason,
}

/// Loaded and summarized input of one run.
#[derive(Debug)]
pub struct PreparedRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub files_loaded: usize,
    /// Channels that enter consolidation
    pub channels: Vec<ChannelSummary>,
    pub screened: Vec<ScreenedChannel>,
    pub skipped: Vec<SkippedFile>,
}

impl PreparedRun {
    pub fn single_cycle(&self) -> impl Iterator<Item = &ScreenedChannel> {
        self.screened
            .iter()
            .filter(|s| s.reason == ScreenReason::SingleCycle)
    }

    pub fn abnormal_first_cycle(&self) -> impl Iterator<Item = &ScreenedChannel> {
        self.screened
            .iter()
            .filter(|s| matches!(s.reason, ScreenReason::AbnormalFirstCycle(_)))
    }
}

/// Grouped, filtered and aggregated view over a prepared run.
#[derive(Debug)]
pub struct Consolidation<'c> {
    pub groups: Batches<'c>,
    pub filtered: FilterOutcome<'c>,
    pub report: AggregateReport<'c>,
}

/// Runs the consolidation stages with one configuration snapshot.
pub struct Pipeline<'a> {
    config: &'a Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Load, screen and summarize every file under `input`. Files under
    /// `output` are left out, so earlier results written inside the input
    /// tree are never read back as cycle data.
    pub fn prepare(&self, input: &Path, output: &Path) -> CellQcResult<PreparedRun> {
        let run_id = Uuid::new_v4();
        let _span = info_span!("prepare", run_id = %run_id).entered();

        let loader = CycleLoader::new(&self.config.loader)?.excluding(output);
        let loaded = loader.load_all(input)?;
        let files_loaded = loaded.datasets.len();

        let mut run = self.prepare_datasets(loaded.datasets);
        run.run_id = run_id;
        run.files_loaded = files_loaded;
        run.skipped = loaded.skipped;
        Ok(run)
    }

    /// Screen and summarize already-loaded datasets.
    pub fn prepare_datasets(&self, datasets: Vec<ChannelDataset>) -> PreparedRun {
        let summarizer = ChannelSummarizer::new(self.config);
        let mut run = PreparedRun {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            files_loaded: datasets.len(),
            channels: Vec::new(),
            screened: Vec::new(),
            skipped: Vec::new(),
        };

        for dataset in datasets {
            let reason = screen(&dataset.cycles, &self.config.screening);
            let summary = summarizer.summarize(dataset);
            match reason {
                Some(reason) => {
                    info!(channel = %summary.channel, reason = %reason, "Channel screened out");
                    run.screened.push(ScreenedChannel { summary, reason });
                }
                None => run.channels.push(summary),
            }
        }

        info!(
            channels = run.channels.len(),
            screened = run.screened.len(),
            "Channels summarized"
        );
        run
    }

    /// Group, filter and aggregate the consolidated channels. Each batch is
    /// filtered and aggregated inside its own isolation boundary.
    pub fn consolidate<'c>(&self, run: &'c PreparedRun) -> Consolidation<'c> {
        let _span = info_span!("consolidate", run_id = %run.run_id).entered();

        let groups = group_batches(&run.channels);
        let (filtered, report) = BatchStatisticsAggregator::new(self.config).aggregate(&groups);

        Consolidation {
            groups,
            filtered,
            report,
        }
    }
}
