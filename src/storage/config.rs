//! The flat `key=value` configuration file (spec 6) and its typed form.
//!
//! Grounded in the observation (spec.md §2 "Ambient Stack") that no crate in
//! the retrieval pack pulls in a config-file crate for a flat `key=value`
//! format; this is a small hand-rolled parser, matching the teacher's own
//! preference for hand-rolled line formats over external parsing crates
//! (`network::fgtw::protocol`'s line-oriented wire format is the closest
//! teacher precedent). The typed [`Config`] struct itself derives
//! `serde::Deserialize` so embedding applications that already have a
//! `serde_json`/TOML config layer of their own can construct one directly.

use super::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    None,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::None => log::LevelFilter::Off,
        }
    }

    fn parse(s: &str) -> StorageResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "NONE" => Ok(Self::None),
            other => Err(StorageError::Parse(format!("unknown log_level {other}"))),
        }
    }
}

/// The typed configuration surface the engine consumes (spec 6's table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bootstrap_nodes: Vec<String>,
    pub log_level: LogLevel,
    pub log_tags: Option<String>,
    pub message_queue_capacity: usize,
    pub presence_refresh_secs: u64,
    pub inbox_poll_secs: u64,
    pub spillway_ttl_secs: u64,
    pub send_deadline_direct_ms: u64,
    pub send_deadline_ice_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            log_level: LogLevel::Info,
            log_tags: None,
            message_queue_capacity: 20,
            presence_refresh_secs: 300,
            inbox_poll_secs: 120,
            spillway_ttl_secs: 7 * 86_400,
            send_deadline_direct_ms: 2_000,
            send_deadline_ice_ms: 10_000,
        }
    }
}

impl Config {
    pub fn presence_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.presence_refresh_secs)
    }

    pub fn inbox_poll_interval(&self) -> Duration {
        Duration::from_secs(self.inbox_poll_secs)
    }

    pub fn spillway_ttl(&self) -> Duration {
        Duration::from_secs(self.spillway_ttl_secs)
    }

    /// Parse the flat `key=value` format of spec 6. Blank lines and lines
    /// starting with `#` are ignored; unknown keys are ignored rather than
    /// rejected, so older config files stay loadable across additions to
    /// this table.
    pub fn parse(text: &str) -> StorageResult<Self> {
        let mut config = Self::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                StorageError::Parse(format!("line {}: expected key=value", lineno + 1))
            })?;
            let key = key.trim();
            let value = value.trim();
            match key {
                "bootstrap_nodes" => {
                    config.bootstrap_nodes = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect();
                }
                "log_level" => config.log_level = LogLevel::parse(value)?,
                "log_tags" => config.log_tags = Some(value.to_string()),
                "message_queue_capacity" => {
                    let n: usize = value
                        .parse()
                        .map_err(|_| StorageError::Parse(format!("line {}: not a number", lineno + 1)))?;
                    if !(1..=100).contains(&n) {
                        return Err(StorageError::Parse(
                            "message_queue_capacity must be in 1..=100".into(),
                        ));
                    }
                    config.message_queue_capacity = n;
                }
                "presence_refresh_secs" => config.presence_refresh_secs = parse_u64(value, lineno)?,
                "inbox_poll_secs" => config.inbox_poll_secs = parse_u64(value, lineno)?,
                "spillway_ttl_secs" => config.spillway_ttl_secs = parse_u64(value, lineno)?,
                "send_deadline_direct_ms" => config.send_deadline_direct_ms = parse_u64(value, lineno)?,
                "send_deadline_ice_ms" => config.send_deadline_ice_ms = parse_u64(value, lineno)?,
                _ => log::debug!("ignoring unknown config key '{key}' at line {}", lineno + 1),
            }
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

fn parse_u64(value: &str, lineno: usize) -> StorageResult<u64> {
    value
        .parse()
        .map_err(|_| StorageError::Parse(format!("line {}: not a number", lineno + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.message_queue_capacity, 20);
        assert_eq!(config.presence_refresh_secs, 300);
        assert_eq!(config.inbox_poll_secs, 120);
        assert_eq!(config.spillway_ttl_secs, 7 * 86_400);
    }

    #[test]
    fn parses_bootstrap_node_list() {
        let config = Config::parse("bootstrap_nodes = a.example:1, b.example:2\n").unwrap();
        assert_eq!(config.bootstrap_nodes, vec!["a.example:1", "b.example:2"]);
    }

    #[test]
    fn rejects_out_of_range_queue_capacity() {
        assert!(Config::parse("message_queue_capacity=0").is_err());
        assert!(Config::parse("message_queue_capacity=101").is_err());
        assert!(Config::parse("message_queue_capacity=100").is_ok());
    }

    #[test]
    fn ignores_comments_and_blank_lines_and_unknown_keys() {
        let config = Config::parse("# a comment\n\nlog_level=WARN\nsomething_future=1\n").unwrap();
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn rejects_unknown_log_level() {
        assert!(Config::parse("log_level=LOUD").is_err());
    }
}
