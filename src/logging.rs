//! Logging setup
//!
//! One entry point installing the global `tracing` subscriber, pretty or
//! JSON, on stderr so stdout stays free for command output. `RUST_LOG`
//! overrides the configured level.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level used when neither config nor `RUST_LOG` sets one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Output format for the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}' (expected pretty or json)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `omecmd=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to install tracing subscriber: {source}")]
    SubscriberInstall {
        #[from]
        source: tracing_subscriber::util::TryInitError,
    },
}

/// Install the global subscriber
///
/// Fails if one is already installed, so a second call is harmless to
/// ignore in tests.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(&config.level);
    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr).with_target(false))
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()?,
    }
    Ok(())
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
