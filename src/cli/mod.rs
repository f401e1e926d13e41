//! CLI command definitions and handlers.

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::OutlierMethod;

pub mod config;
pub mod inspect;
pub mod run;

/// cellqc - battery cycling batch consolidation.
#[derive(Parser, Debug)]
#[command(name = "cellqc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level
    #[arg(long, global = true, default_value = "info", env = "CELLQC_LOG_LEVEL")]
    pub log_level: LogLevel,

    /// Path to config file
    #[arg(long, global = true, env = "CELLQC_CONFIG")]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Outlier method override on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutlierArg {
    Boxplot,
    ZscoreMad,
}

impl From<OutlierArg> for OutlierMethod {
    fn from(arg: OutlierArg) -> Self {
        match arg {
            OutlierArg::Boxplot => OutlierMethod::Boxplot,
            OutlierArg::ZscoreMad => OutlierMethod::ZscoreMad,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consolidate a directory of cycle exports into batch statistics
    Run {
        /// Input directory (searched recursively) or a single CSV file
        input: String,

        /// Output directory [default: <input>/cellqc-output]
        #[arg(long, short)]
        output: Option<String>,

        /// Override the configured outlier method
        #[arg(long, value_enum)]
        outlier_method: Option<OutlierArg>,
    },

    /// Show what one cycle export parses to
    Inspect {
        /// Path to a cycle CSV export
        path: String,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate configuration file
    Validate,

    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Print the default configuration as TOML
    Defaults,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "cellqc",
            "run",
            "data/",
            "--output",
            "out/",
            "--outlier-method",
            "zscore-mad",
        ])
        .unwrap();

        match cli.command {
            Command::Run {
                input,
                output,
                outlier_method,
            } => {
                assert_eq!(input, "data/");
                assert_eq!(output.as_deref(), Some("out/"));
                assert_eq!(outlier_method, Some(OutlierArg::ZscoreMad));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["cellqc", "config", "show", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_str(), "debug");
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn test_outlier_arg_maps_to_method() {
        assert_eq!(OutlierMethod::from(OutlierArg::Boxplot), OutlierMethod::Boxplot);
        assert_eq!(OutlierMethod::from(OutlierArg::ZscoreMad), OutlierMethod::ZscoreMad);
    }
}
