//! Built-in client defaults (layer 1)
//!
//! Hardcoded defaults for every configuration value that has one.
//! Transport and session settings have none and must come from a file or
//! the command line.

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Status queries per callback loop (default: 10)
    pub callback_loops: u32,

    /// Cap on one sleep between queries in ms (default: 500)
    pub callback_ms_per_loop: u64,

    /// First sleep under exponential backoff in ms (default: 50)
    pub callback_initial_interval_ms: u64,

    /// Sleep schedule (default: "exponential")
    pub callback_backoff: String,

    /// Log filter (default: "info")
    pub logging_level: String,

    /// Log output format (default: "pretty")
    pub logging_format: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            callback_loops: 10,
            callback_ms_per_loop: 500,
            callback_initial_interval_ms: 50,
            callback_backoff: "exponential".to_string(),
            logging_level: "info".to_string(),
            logging_format: "pretty".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "callback": {
                "loops": self.callback_loops,
                "ms_per_loop": self.callback_ms_per_loop,
                "initial_interval_ms": self.callback_initial_interval_ms,
                "backoff": self.callback_backoff,
            },
            "logging": {
                "level": self.logging_level,
                "format": self.logging_format,
            }
        })
    }
}
