//! Channel metadata from cycle-export filenames.
//!
//! Exports are named by the cycler, for example
//! `M2-PC2-036-8-1-Q3-2401-A1-1C-0315_S2.csv`:
//! three host segments, two channel segments, then the batch description.
//! Testers on IP-addressed hosts produce `192.168.1.20-270060-7-5-...`
//! where the host is two segments.

use regex::Regex;
use std::path::Path;
use tracing::{debug, trace};

use crate::config::{LoaderConfig, SeriesRule};
use crate::error::{ConfigError, LoadError};
use crate::types::{ChannelId, FileMetadata, TestMode};

/// Parser for cycle-export filenames.
pub struct FilenameParser {
    mode_patterns: Vec<(Regex, TestMode)>,
    default_mode: TestMode,
    series: Vec<SeriesRule>,
    default_series: String,
    host_id_max_length: usize,
    default_channel: String,
    // Fallback channel marker such as CH-12 or ch_3
    channel_pattern: Regex,
    // Dates like 2024-03-15, 20240315, 240315 or 0315
    date_pattern: Regex,
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl FilenameParser {
    pub fn new(config: &LoaderConfig) -> Result<Self, ConfigError> {
        let mode_patterns = config
            .mode_tokens
            .iter()
            .map(|t| Ok((compile(&format!("(?i){}", regex::escape(&t.token)))?, t.mode)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            mode_patterns,
            default_mode: config.default_test_mode,
            series: config.series.clone(),
            default_series: config.default_series.clone(),
            host_id_max_length: config.host_id_max_length,
            default_channel: config.default_channel.clone(),
            channel_pattern: compile(r"(?i)CH[-_]?(\d+)")?,
            date_pattern: compile(r"(\d{4}[-/]?\d{2}[-/]?\d{2}|\d{6}|\d{4})")?,
        })
    }

    /// Parse channel metadata from a file path.
    pub fn parse(&self, path: &Path) -> Result<FileMetadata, LoadError> {
        let filename = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| LoadError::FilenameParse(path.display().to_string()))?;
        let stem = path
            .file_stem()
            .and_then(|f| f.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LoadError::FilenameParse(path.display().to_string()))?;

        trace!(filename = %filename, "Parsing filename");

        let channel = self
            .split_host_channel(stem)
            .unwrap_or_else(|| self.fallback_channel(stem));
        let metadata = FileMetadata {
            channel,
            series: self.detect_series(filename),
            batch_id: extract_batch(stem),
            shelf_time: self.extract_shelf_time(stem),
            test_mode: self.detect_mode(filename),
        };

        debug!(
            filename = %filename,
            channel = %metadata.channel,
            series = %metadata.series,
            batch = %metadata.batch_id,
            mode = %metadata.test_mode,
            "Filename parsed"
        );

        Ok(metadata)
    }

    /// Host and channel from the leading dash segments.
    fn split_host_channel(&self, stem: &str) -> Option<ChannelId> {
        let parts: Vec<&str> = stem.split('-').collect();
        let (host, channel) = if parts[0].contains('.') && parts.len() >= 4 {
            (&parts[..2], &parts[2..4])
        } else if parts.len() >= 5 {
            (&parts[..3], &parts[3..5])
        } else {
            return None;
        };
        Some(ChannelId {
            host_id: host.join("-"),
            channel_id: channel.join("-"),
        })
    }

    /// Whole stem as host, channel from a `CH<n>` marker when present.
    fn fallback_channel(&self, stem: &str) -> ChannelId {
        let host_id: String = stem.chars().take(self.host_id_max_length).collect();
        let channel_id = self
            .channel_pattern
            .captures(stem)
            .and_then(|c| c.get(1))
            .map(|m| format!("CH-{}", m.as_str()))
            .unwrap_or_else(|| self.default_channel.clone());
        ChannelId {
            host_id,
            channel_id,
        }
    }

    /// Shelf (start) time: the last two dash segments before the first space,
    /// else the first date-like run of digits, else the last two segments.
    fn extract_shelf_time(&self, stem: &str) -> String {
        if let Some((before_space, _)) = stem.split_once(' ') {
            let parts: Vec<&str> = before_space.split('-').collect();
            return parts[parts.len().saturating_sub(2)..].join("-");
        }
        if let Some(m) = self.date_pattern.find(stem) {
            return m.as_str().to_string();
        }
        let parts: Vec<&str> = stem.split('-').collect();
        parts[parts.len().saturating_sub(2)..].join("-")
    }

    fn detect_mode(&self, filename: &str) -> TestMode {
        self.mode_patterns
            .iter()
            .find(|(pattern, _)| pattern.is_match(filename))
            .map(|(_, mode)| *mode)
            .unwrap_or(self.default_mode)
    }

    fn detect_series(&self, filename: &str) -> String {
        self.series
            .iter()
            .find(|rule| rule.matches(filename))
            .map(|rule| rule.name.clone())
            .unwrap_or_else(|| self.default_series.clone())
    }
}

/// Raw batch id: segments after the channel in the part before the first
/// underscore, joined with the token that follows the underscore.
pub fn extract_batch(stem: &str) -> String {
    let mut underscore = stem.splitn(3, '_');
    let head = underscore.next().unwrap_or(stem);
    let head = head.split(' ').next().unwrap_or(head);

    match underscore.next() {
        Some(suffix) => {
            let suffix = suffix.split_whitespace().next().unwrap_or("");
            let prefix = head.split('-').skip(5).collect::<Vec<_>>().join("-");
            match (prefix.is_empty(), suffix.is_empty()) {
                (false, false) => format!("{}-{}", prefix, suffix),
                (false, true) => prefix,
                (true, false) => suffix.to_string(),
                (true, true) => stem.to_string(),
            }
        }
        None => {
            let parts: Vec<&str> = head.split('-').collect();
            if parts.len() >= 6 {
                parts[5..].join("-")
            } else {
                stem.to_string()
            }
        }
    }
}

/// Batch id shared by sibling sub-batches: the last three dash segments are
/// dropped when there are more than three.
pub fn unify_batch_id(batch_id: &str) -> String {
    let parts: Vec<&str> = batch_id.split('-').collect();
    if parts.len() > 3 {
        parts[..parts.len() - 3].join("-")
    } else {
        batch_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn make_parser() -> FilenameParser {
        FilenameParser::new(&LoaderConfig::default()).unwrap()
    }

    #[test]
    fn test_standard_filename() {
        let parser = make_parser();
        let meta = parser
            .parse(&PathBuf::from("data/M2-PC2-036-8-1-Q3-2401-A1-1C-0315_S2.csv"))
            .unwrap();

        assert_eq!(meta.channel.host_id, "M2-PC2-036");
        assert_eq!(meta.channel.channel_id, "8-1");
        assert_eq!(meta.series, "Q3");
        assert_eq!(meta.batch_id, "Q3-2401-A1-1C-0315-S2");
        assert_eq!(meta.test_mode, TestMode::Rate1C);
    }

    #[test]
    fn test_ip_host_filename() {
        let parser = make_parser();
        let meta = parser
            .parse(&PathBuf::from("192.168.110.236-270060-7-5-G-2402-B3-0.1C-0401_A.csv"))
            .unwrap();

        assert_eq!(meta.channel.host_id, "192.168.110.236-270060");
        assert_eq!(meta.channel.channel_id, "7-5");
        assert_eq!(meta.series, "G");
        assert_eq!(meta.test_mode, TestMode::LowRate0p1C);
    }

    #[test]
    fn test_fallback_host_and_channel() {
        let parser = make_parser();
        let meta = parser.parse(&PathBuf::from("cell_ch07.csv")).unwrap();
        assert_eq!(meta.channel.host_id, "cell_ch07");
        assert_eq!(meta.channel.channel_id, "CH-07");

        let meta = parser.parse(&PathBuf::from("sample.csv")).unwrap();
        assert_eq!(meta.channel.channel_id, "CH-01");
    }

    #[test]
    fn test_mode_detection() {
        let parser = make_parser();
        assert_eq!(parser.detect_mode("a-b-0.1C-x"), TestMode::LowRate0p1C);
        assert_eq!(parser.detect_mode("a-b-1c-x"), TestMode::Rate1C);
        assert_eq!(parser.detect_mode("a-b-BL-x"), TestMode::Baseline);
        assert_eq!(parser.detect_mode("a-b-0.33C-x"), TestMode::Other);
        // No token: default mode
        assert_eq!(parser.detect_mode("a-b-c"), TestMode::Rate1C);
    }

    #[test]
    fn test_series_rules_in_order() {
        let parser = make_parser();
        assert_eq!(parser.detect_series("x-G-y"), "G");
        // G excludes -M-, so M wins
        assert_eq!(parser.detect_series("x-G-M-y"), "M");
        assert_eq!(parser.detect_series("x-Z-y"), "Z");
        assert_eq!(parser.detect_series("x-y"), "Q3");
    }

    #[test]
    fn test_shelf_time() {
        let parser = make_parser();
        assert_eq!(
            parser.extract_shelf_time("M2-PC2-036-8-1-Q3-A1-03-15 rerun_S2"),
            "03-15"
        );
        assert_eq!(
            parser.extract_shelf_time("M2-PC2-036-8-1-Q3-A1-20240315_S2"),
            "20240315"
        );
        assert_eq!(parser.extract_shelf_time("a-b-c"), "b-c");
    }

    #[test]
    fn test_extract_batch() {
        assert_eq!(
            extract_batch("M2-PC2-036-8-1-Q3-2401-A1-1C-0315_S2"),
            "Q3-2401-A1-1C-0315-S2"
        );
        assert_eq!(extract_batch("M2-PC2-036-8-1-Q3-2401"), "Q3-2401");
        assert_eq!(extract_batch("short-name"), "short-name");
        assert_eq!(
            extract_batch("M2-PC2-036-8-1-Q3-2401-03-15 rerun_S2 x"),
            "Q3-2401-03-15-S2"
        );
    }

    #[test]
    fn test_unify_batch_id() {
        assert_eq!(unify_batch_id("Q3-2401-A1-1C-0315-S2"), "Q3-2401-A1");
        assert_eq!(unify_batch_id("Q3-2401-A1-1C"), "Q3");
        assert_eq!(unify_batch_id("Q3-2401-A1"), "Q3-2401-A1");
        assert_eq!(unify_batch_id("single"), "single");
    }
}
