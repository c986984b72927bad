//! Config loading, TOML parsing, and env var override tests.
//!
//! The env override test is `#[ignore]` (it mutates process env and
//! conflicts in parallel).
//! Run it with: `cargo test --test config_tests -- --ignored --test-threads=1`

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tuplex::config::LogFormat;
use tuplex::{BindingSet, Config, MemoryTripleSource, TupleExpr, TupleExprEvaluation, Value};

fn write_config(temp: &TempDir, content: &str) -> String {
    let path = temp.path().join("tuplex.toml");
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

// Default Configuration Tests
#[test]
fn test_config_default_evaluation_settings() {
    let config = Config::default();
    assert_eq!(config.evaluation.query_timeout_secs, 0);
    assert_eq!(config.evaluation.queue_capacity, 1000);
    assert_eq!(config.evaluation.poll_interval_ms, 100);
    assert_eq!(config.evaluation.worker_threads, 0); // 0 = one per core
}

#[test]
fn test_config_default_spill_settings() {
    let config = Config::default();
    assert_eq!(config.spill.memory_threshold, 10_000);
    assert!(config.spill.temp_dir.is_none());
}

#[test]
fn test_config_default_logging() {
    let config = Config::default();
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, LogFormat::Text);
}

// TOML File Parsing Tests
#[test]
fn test_load_config_from_toml() {
    let temp = TempDir::new().unwrap();
    let path = write_config(
        &temp,
        r#"
[evaluation]
query_timeout_secs = 30
queue_capacity = 64
poll_interval_ms = 5
worker_threads = 3

[spill]
memory_threshold = 500
temp_dir = "/tmp/tuplex-spill"

[logging]
level = "debug"
format = "json"
"#,
    );

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.evaluation.query_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.evaluation.queue_capacity, 64);
    assert_eq!(config.evaluation.poll_interval_ms, 5);
    assert_eq!(config.evaluation.worker_count(), 3);
    assert_eq!(config.spill.memory_threshold, 500);
    assert_eq!(config.spill.temp_dir, Some(PathBuf::from("/tmp/tuplex-spill")));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[spill]\nmemory_threshold = 7\n");

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.spill.memory_threshold, 7);
    assert_eq!(config.evaluation.queue_capacity, 1000);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_missing_file_yields_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("absent.toml");

    let config = Config::from_file(&path.to_string_lossy()).unwrap();

    assert_eq!(config.evaluation.queue_capacity, 1000);
}

#[test]
fn test_invalid_value_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[evaluation]\nqueue_capacity = \"lots\"\n");

    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_unknown_log_format_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[logging]\nformat = \"xml\"\n");

    assert!(Config::from_file(&path).is_err());
}

// Environment Override Tests
#[test]
#[ignore = "Requires --test-threads=1 due to process env mutation"]
fn test_env_overrides_file() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[evaluation]\nqueue_capacity = 64\n");

    env::set_var("TUPLEX_EVALUATION__QUEUE_CAPACITY", "9");
    let config = Config::from_file(&path);
    env::remove_var("TUPLEX_EVALUATION__QUEUE_CAPACITY");

    assert_eq!(config.unwrap().evaluation.queue_capacity, 9);
}

// Builder Integration
#[test]
fn test_builder_uses_config() {
    let temp = TempDir::new().unwrap();
    let path = write_config(
        &temp,
        "[evaluation]\nworker_threads = 2\nqueue_capacity = 1\n\n[spill]\nmemory_threshold = 1\n",
    );
    let config = Config::from_file(&path).unwrap();

    let store = MemoryTripleSource::new();
    store.insert(Value::iri("urn:a"), Value::iri("urn:p"), Value::iri("urn:b"));
    store.insert(Value::iri("urn:c"), Value::iri("urn:p"), Value::iri("urn:d"));
    let evaluation = TupleExprEvaluation::builder(Arc::new(store))
        .config(&config)
        .build()
        .unwrap();

    assert_eq!(evaluation.worker_pool().size(), 2);

    let expr = TupleExpr::distinct(TupleExpr::pattern("?s", "urn:p", "?o"));
    let rows: Vec<BindingSet> = evaluation
        .evaluate(&expr, BindingSet::empty())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 2);
}
