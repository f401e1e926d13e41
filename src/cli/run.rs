//! Run command - one consolidation pass over an input directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::OutlierArg;
use crate::config::{paths, Config};
use crate::export::{Exporter, RunReport};
use crate::pipeline::{Consolidation, Pipeline};

/// Run the pipeline and print a summary report.
pub fn run(
    config_path: Option<&str>,
    input: &str,
    output: Option<&str>,
    outlier_method: Option<OutlierArg>,
) -> Result<()> {
    let mut config = Config::resolve(config_path)?;
    if let Some(method) = outlier_method {
        config.outlier.method = method.into();
    }
    config.validate().context("Configuration is invalid")?;
    info!(config_path = ?config.path, method = %config.outlier.method, "Configuration loaded");

    let input = Path::new(input);
    let output_dir = output
        .map(PathBuf::from)
        .unwrap_or_else(|| paths::default_output_dir(input));

    let pipeline = Pipeline::new(&config);
    let prepared = pipeline
        .prepare(input, &output_dir)
        .with_context(|| format!("Failed to load input: {}", input.display()))?;
    let consolidation = pipeline.consolidate(&prepared);

    let report = RunReport::new(input, config.outlier.method, &prepared, &consolidation);
    let exporter = Exporter::new(&output_dir)?;
    let written = exporter.write_all(&prepared, &consolidation, &report)?;

    print_summary(&report, &consolidation);

    println!("Outputs ({}):", exporter.dir().display());
    for path in &written {
        if let Some(name) = path.file_name() {
            println!("  {}", name.to_string_lossy());
        }
    }
    println!();

    Ok(())
}

fn print_summary(report: &RunReport, consolidation: &Consolidation<'_>) {
    let counts = &report.counts;

    println!();
    println!("cellqc run {}", report.run_id);
    println!("==========================================");
    println!();
    println!("Input:           {}", report.input);
    println!("Outlier method:  {}", report.outlier_method);
    println!();
    println!("Files loaded:    {}", counts.files_loaded);
    println!("Files skipped:   {}", counts.files_skipped);
    println!("Single cycle:    {}", counts.single_cycle);
    println!("Abnormal first:  {}", counts.abnormal_first_cycle);
    println!(
        "Channels:        {} ({} after filtering)",
        counts.channels, counts.filtered_channels
    );
    println!("Batches:         {}", counts.batches);
    println!();

    if !consolidation.report.statistics.is_empty() {
        println!("Batch statistics:");
        for row in &consolidation.report.statistics {
            let reference = row
                .reference
                .as_ref()
                .map(|r| format!("{} ({})", r.channel, r.method))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<28} {:>3}/{:<3} reference: {}",
                row.key.to_string(),
                row.valid_count,
                row.total_count,
                reference
            );
        }
        println!();
    }

    if !consolidation.report.inconsistent.is_empty() {
        println!("Needs retest:");
        for batch in &consolidation.report.inconsistent {
            println!(
                "  {} - {} ({} of {} severe)",
                batch.key,
                batch.cause,
                batch.severe_count,
                batch.channels.len()
            );
        }
        println!();
    }

    if !report.failed_batches.is_empty() {
        println!("Failed batches:");
        for failed in &report.failed_batches {
            println!("  {} - {}", failed.batch, failed.reason);
        }
        println!();
    }
}
