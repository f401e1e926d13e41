//! Error types for cellqc.

use thiserror::Error;

/// Main error type for the consolidation pipeline.
#[derive(Error, Debug)]
pub enum CellQcError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid filename pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Per-file load failures. A failing file is skipped and reported; it never
/// aborts the rest of the run.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Input path does not exist: {0}")]
    InputNotFound(String),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("Unable to parse filename: {0}")]
    FilenameParse(String),

    #[error("Missing column '{column}' in {file}")]
    MissingColumn { file: String, column: String },

    #[error("Invalid value '{value}' in column '{column}' at row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    #[error("No cycle rows in {0}")]
    Empty(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Output directory not writable: {0}")]
    NotWritable(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline operations.
pub type CellQcResult<T> = Result<T, CellQcError>;
