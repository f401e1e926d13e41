//! cellqc
//!
//! Consolidates per-channel battery cycling exports into batch-level
//! statistics: rate-cycle health, retention, outlier filtering and a
//! representative reference channel per production batch.

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod aggregate;
mod cli;
mod config;
mod crash;
mod error;
mod export;
mod loader;
mod metrics;
mod outlier;
mod pipeline;
mod rate;
mod reference;
mod retention;
mod types;

use cli::{Cli, Command};

fn main() {
    if let Err(e) = real_main() {
        show_startup_error(&format!("{:?}", e));
        std::process::exit(1);
    }
}

fn show_startup_error(message: &str) {
    eprintln!("cellqc error: {}", message);
}

fn real_main() -> Result<()> {
    crash::install_panic_hook();

    let cli = Cli::parse();

    // Run also keeps a JSON log file; other commands log to the console only
    let _guard = match &cli.command {
        Command::Run { .. } => init_file_logging(&cli)?,
        _ => init_console_logging(&cli)?,
    };

    info!(version = env!("CARGO_PKG_VERSION"), "cellqc starting");

    let config_path = cli.config_path.as_deref();
    match cli.command {
        Command::Run {
            input,
            output,
            outlier_method,
        } => cli::run::run(config_path, &input, output.as_deref(), outlier_method),
        Command::Inspect { path } => cli::inspect::run(config_path, &path),
        Command::Config { action } => cli::config::run(config_path, action),
        Command::Version => {
            println!("cellqc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_console_logging(cli: &Cli) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    Ok(None)
}

fn init_file_logging(cli: &Cli) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_dir = config::paths::log_dir()?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("cellqc")
        .filename_suffix("log")
        .max_log_files(10)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_writer(non_blocking),
        )
        .init();

    Ok(Some(guard))
}
