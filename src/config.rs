//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - tuplex.toml (default configuration)
//! - tuplex.local.toml (git-ignored local overrides)
//! - Environment variables (TUPLEX_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # tuplex.toml
//! [evaluation]
//! query_timeout_secs = 30
//! queue_capacity = 1000
//!
//! [spill]
//! memory_threshold = 50000
//! temp_dir = "/var/tmp/tuplex"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! TUPLEX_EVALUATION__QUERY_TIMEOUT_SECS=5
//! TUPLEX_LOGGING__FORMAT=json
//! ```

use crate::collections::SpillOptions;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub spill: SpillConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Evaluation strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Wall-clock budget per query in seconds. 0 = no timeout.
    #[serde(default)]
    pub query_timeout_secs: u64,

    /// Capacity of the result queue between the pipe tree and the caller
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often a waiting caller checks for errors and the deadline
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Worker threads draining leaf iterations
    /// 0 = one per CPU core (at least 2)
    #[serde(default)]
    pub worker_threads: usize,
}

impl EvaluationConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_secs > 0).then(|| Duration::from_secs(self.query_timeout_secs))
    }

    pub fn worker_count(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().max(2)
        } else {
            self.worker_threads
        }
    }
}

/// Disk spill settings for Distinct, Intersection, Difference and Order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpillConfig {
    /// Entries kept in memory before spilling to temp files
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: usize,

    /// Directory for temp files (system temp dir when unset)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl SpillConfig {
    pub fn options(&self) -> SpillOptions {
        SpillOptions {
            memory_threshold: self.memory_threshold,
            temp_dir: self.temp_dir.clone(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line records
    #[default]
    Text,
    /// One JSON object per record
    Json,
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_memory_threshold() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (TUPLEX_*)
    /// 2. tuplex.local.toml
    /// 3. tuplex.toml
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("tuplex.toml"))
            .merge(Toml::file("tuplex.local.toml"))
            .merge(Env::prefixed("TUPLEX_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TUPLEX_").split("__"))
            .extract()
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            query_timeout_secs: 0,
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            worker_threads: 0,
        }
    }
}

impl Default for SpillConfig {
    fn default() -> Self {
        SpillConfig {
            memory_threshold: default_memory_threshold(),
            temp_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.evaluation.query_timeout_secs, 0);
        assert_eq!(config.evaluation.queue_capacity, 1000);
        assert_eq!(config.evaluation.poll_interval_ms, 100);
        assert_eq!(config.spill.memory_threshold, 10_000);
        assert!(config.spill.temp_dir.is_none());
    }

    #[test]
    fn test_default_logging_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_query_timeout_zero_is_unlimited() {
        let mut evaluation = EvaluationConfig::default();
        assert_eq!(evaluation.query_timeout(), None);
        evaluation.query_timeout_secs = 3;
        assert_eq!(evaluation.query_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_worker_count() {
        let mut evaluation = EvaluationConfig::default();
        assert!(evaluation.worker_count() >= 2);
        evaluation.worker_threads = 7;
        assert_eq!(evaluation.worker_count(), 7);
    }

    #[test]
    fn test_spill_options() {
        let spill = SpillConfig {
            memory_threshold: 12,
            temp_dir: Some(PathBuf::from("/tmp/spill")),
        };
        let options = spill.options();
        assert_eq!(options.memory_threshold, 12);
        assert_eq!(options.temp_dir, Some(PathBuf::from("/tmp/spill")));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[evaluation]"));
        assert!(toml_str.contains("[spill]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = Config::default();
        config.evaluation.query_timeout_secs = 9;
        config.logging.format = LogFormat::Json;
        let toml_str = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.evaluation.query_timeout_secs, 9);
        assert_eq!(back.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let back: Config = toml::from_str("[evaluation]\nqueue_capacity = 16\n").unwrap();
        assert_eq!(back.evaluation.queue_capacity, 16);
        assert_eq!(back.evaluation.poll_interval_ms, 100);
        assert_eq!(back.spill.memory_threshold, 10_000);
    }

    #[test]
    fn test_log_format_serde() {
        let json = serde_json::to_string(&LogFormat::Json).unwrap();
        assert_eq!(json, "\"json\"");
        let json = serde_json::to_string(&LogFormat::Text).unwrap();
        assert_eq!(json, "\"text\"");
    }
}
