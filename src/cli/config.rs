//! Config command - configuration utilities.

use anyhow::Result;
use std::path::PathBuf;

use crate::cli::ConfigAction;
use crate::config::{self, Config};

/// Run the config command.
pub fn run(config_path: Option<&str>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Validate => validate_config(config_path),
        ConfigAction::Show => show_config(config_path),
        ConfigAction::Path => show_path(config_path),
        ConfigAction::Defaults => show_defaults(),
    }
}

fn target_path(config_path: Option<&str>) -> PathBuf {
    config_path
        .map(PathBuf::from)
        .unwrap_or_else(config::paths::config_file)
}

fn validate_config(config_path: Option<&str>) -> Result<()> {
    let path = target_path(config_path);

    println!();
    println!("Validating configuration...");
    println!("Path: {}", path.display());
    println!();

    if !path.exists() {
        println!("No configuration file found; built-in defaults apply.");
        println!();
        println!("Write the defaults to a file with:");
        println!("  cellqc config defaults > {}", path.display());
        println!();
        return Ok(());
    }

    match Config::load_from(&path) {
        Ok(config) => {
            println!("Configuration is valid.");
            println!();
            println!("Summary:");
            println!("  Outlier method: {}", config.outlier.method);
            println!(
                "  Reference priority: {}",
                config
                    .reference
                    .method_priority
                    .iter()
                    .map(|m| m.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!("  File pattern: {}", config.loader.file_pattern);
            println!("  Series rules: {}", config.loader.series.len());
        }
        Err(e) => {
            println!("ERROR: Configuration is invalid");
            println!();
            println!("Details: {:#}", e);
            println!();
            println!("Fix the configuration and run 'cellqc config validate' again.");
        }
    }

    println!();
    Ok(())
}

fn show_config(config_path: Option<&str>) -> Result<()> {
    let config = Config::resolve(config_path)?;
    if config.path.as_os_str().is_empty() {
        println!("# built-in defaults");
    } else {
        println!("# {}", config.path.display());
    }
    println!("{}", config.to_toml()?);
    Ok(())
}

fn show_path(config_path: Option<&str>) -> Result<()> {
    println!("{}", target_path(config_path).display());
    Ok(())
}

fn show_defaults() -> Result<()> {
    println!("{}", Config::default().to_toml()?);
    Ok(())
}
