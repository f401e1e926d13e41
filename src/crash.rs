//! Crash reporting and panic handling.

use std::backtrace::Backtrace;
use std::fs;
use std::panic::PanicHookInfo;
use std::path::PathBuf;

use crate::config::paths;

/// Install the panic hook for crash reporting.
///
/// Panics inside an isolated batch are caught further up; the report is
/// still written so the failure can be investigated.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        handle_panic(panic_info);
    }));
}

fn handle_panic(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::force_capture();

    let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    };

    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "unknown location".to_string());

    let report = build_crash_report(&message, &location, &backtrace.to_string());

    tracing::error!(message = %message, location = %location, "Panic");

    eprintln!("cellqc panicked: {} ({})", message, location);
    if let Some(path) = write_crash_report(&report) {
        eprintln!("Crash report saved to: {}", path.display());
    }
}

fn build_crash_report(message: &str, location: &str, backtrace: &str) -> String {
    let version = env!("CARGO_PKG_VERSION");
    let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    let os_info = format!("{} {}", std::env::consts::OS, std::env::consts::ARCH);
    let args = std::env::args().collect::<Vec<_>>().join(" ");

    format!(
        r#"cellqc Crash Report
===================

Version: {version}
Timestamp: {timestamp}
OS: {os_info}
Command: {args}

Panic Message:
{message}

Location:
{location}

Backtrace:
{backtrace}
"#
    )
}

fn write_crash_report(report: &str) -> Option<PathBuf> {
    let log_dir = paths::log_dir().ok()?;

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f");
    let path = log_dir.join(format!("crash_{}.txt", timestamp));

    fs::write(&path, report).ok()?;
    Some(path)
}
