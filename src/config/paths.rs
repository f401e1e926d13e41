//! Path utilities for cellqc.
//!
//! Defines standard locations for configuration, logs, and default output.

use std::path::PathBuf;

/// Base data directory.
///
/// Resolved through the platform's application data location, falling back
/// to `~/.local/share/cellqc` when no home-relative location is known.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "CellQC", "cellqc")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
                .join("cellqc")
        })
}

/// Configuration file path.
pub fn config_file() -> PathBuf {
    // Check environment variable first
    if let Ok(path) = std::env::var("CELLQC_CONFIG") {
        return PathBuf::from(path);
    }

    data_dir().join("config.toml")
}

/// Log directory.
pub fn log_dir() -> std::io::Result<PathBuf> {
    let path = data_dir().join("logs");
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Default output directory for a run over `input`: a `cellqc-output`
/// directory next to the input.
pub fn default_output_dir(input: &std::path::Path) -> PathBuf {
    let base = if input.is_dir() {
        input.to_path_buf()
    } else {
        input
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    };
    base.join("cellqc-output")
}
