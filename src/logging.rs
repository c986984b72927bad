//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; embedding applications that do
//! not install their own subscriber can call [`init`] once at startup.
//! `TUPLEX_LOG` overrides the configured level with any `EnvFilter`
//! directive, e.g. `TUPLEX_LOG=tuplex::strategy=trace`.

use crate::config::{LogFormat, LoggingConfig};
use std::env;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding `LoggingConfig::level`
pub const LOG_ENV: &str = "TUPLEX_LOG";

fn filter_for(config: &LoggingConfig) -> EnvFilter {
    let level = env::var(LOG_ENV)
        .ok()
        .unwrap_or_else(|| config.level.clone());
    EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a global fmt subscriber. Returns false when a global subscriber
/// was already set, in which case nothing changes.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = filter_for(config);
    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = match config.format {
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_thread_names(true)
                .json()
                .finish(),
        ),
        LogFormat::Text => Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_thread_names(true)
                .compact()
                .finish(),
        ),
    };
    tracing::subscriber::set_global_default(subscriber).is_ok()
}
