//! Inspect command - show what a single cycle export parses to.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::loader::CycleLoader;
use crate::metrics::{screen, ChannelSummarizer};
use crate::types::{RetentionPoint, ScalarMetric};

/// Parse one file and print its metadata and derived metrics.
pub fn run(config_path: Option<&str>, path: &str) -> Result<()> {
    let config = Config::resolve(config_path)?;
    let loader = CycleLoader::new(&config.loader)?;

    let path = Path::new(path);
    let dataset = loader
        .load_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let screened = screen(&dataset.cycles, &config.screening);
    let summary = ChannelSummarizer::new(&config).summarize(dataset);

    println!();
    println!("File: {}", path.display());
    println!();
    println!("Metadata:");
    println!("  Channel:        {}", summary.channel);
    println!("  Series:         {}", summary.series);
    println!("  Batch:          {}", summary.batch_id);
    println!("  Unified batch:  {}", summary.unified_batch_id);
    println!("  Shelf time:     {}", summary.shelf_time);
    println!("  Test mode:      {}", summary.test_mode);
    println!("  Cycles:         {}", summary.cycle_count);
    println!();

    println!("First cycle:");
    for metric in [
        ScalarMetric::FirstCharge,
        ScalarMetric::FirstDischarge,
        ScalarMetric::FirstEfficiency,
        ScalarMetric::FirstVoltage,
        ScalarMetric::FirstEnergy,
    ] {
        println!("  {:<22} {}", metric.to_string(), fmt_value(summary.metric(metric)));
    }
    println!();

    println!("Rate cycle:");
    println!(
        "  Index:          {}",
        summary
            .rate
            .index
            .map(|i| i.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  Discharge:      {}", fmt_value(summary.rate.discharge));
    println!("  Efficiency:     {}", fmt_value(summary.rate.efficiency));
    println!("  Ratio:          {}", fmt_value(summary.rate.ratio));
    println!("  Status:         {}", summary.rate.status);
    println!();

    match &summary.retention {
        Some(retention) => {
            println!("Retention (baseline cycle {}):", retention.baseline_index);
            print_point("Current", &retention.current);
            if let Some(point) = &retention.at_100 {
                print_point("Cycle 100", point);
            }
            if let Some(point) = &retention.at_200 {
                print_point("Cycle 200", point);
            }
            println!(
                "  Voltage decay:  {} mV/cycle",
                fmt_value(retention.voltage_decay_mv_per_cycle)
            );
        }
        None => println!("Retention: not computed (too few cycles)"),
    }
    println!();

    match screened {
        Some(reason) => println!("Screening: excluded ({})", reason),
        None => println!("Screening: passed"),
    }
    println!();

    Ok(())
}

fn print_point(label: &str, point: &RetentionPoint) {
    println!(
        "  {:<15} capacity {}%  voltage {}%  energy {}%",
        format!("{}:", label),
        fmt_value(point.capacity),
        fmt_value(point.voltage),
        fmt_value(point.energy)
    );
}

fn fmt_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.3}", v),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_value() {
        assert_eq!(fmt_value(Some(98.12345)), "98.123");
        assert_eq!(fmt_value(None), "-");
    }
}
