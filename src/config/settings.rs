//! Typed client settings
//!
//! Read out of the merged configuration value. Keys:
//! - `callback.loops`, `callback.ms_per_loop`, `callback.initial_interval_ms`,
//!   `callback.backoff`
//! - `transport.program`, `transport.args`
//! - `session.key`, `session.group`
//! - `logging.level`, `logging.format`

use serde_json::Value;

use crate::callback::{BackoffPolicy, CallbackConfig};
use crate::host::CommandConfig;
use crate::logging::{LogFormat, LoggingConfig};

use super::effective::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    pub callback: CallbackConfig,
    /// Command transport; absent means only `--mock` can run
    pub transport: Option<CommandConfig>,
    pub session_key: Option<String>,
    /// Group to act under instead of the session default
    pub session_group: Option<i64>,
    pub logging: LoggingConfig,
}

fn lookup<'v>(config: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .try_fold(config, |current, part| current.get(part))
        .filter(|value| !value.is_null())
}

fn invalid(path: &str, expected: &str) -> ConfigError {
    ConfigError::ValidationError(format!("{} must be {}", path, expected))
}

fn get_u64(config: &Value, path: &str) -> Result<Option<u64>, ConfigError> {
    lookup(config, path)
        .map(|v| v.as_u64().ok_or_else(|| invalid(path, "a non-negative integer")))
        .transpose()
}

fn get_str<'v>(config: &'v Value, path: &str) -> Result<Option<&'v str>, ConfigError> {
    lookup(config, path)
        .map(|v| v.as_str().ok_or_else(|| invalid(path, "a string")))
        .transpose()
}

impl ClientSettings {
    /// Extract and validate settings from a merged config value
    pub fn from_value(config: &Value) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut callback = defaults.callback;
        if let Some(loops) = get_u64(config, "callback.loops")? {
            callback.loops = u32::try_from(loops).map_err(|_| invalid("callback.loops", "at most 100000"))?;
        }
        if let Some(ms) = get_u64(config, "callback.ms_per_loop")? {
            callback.ms_per_loop = ms;
        }
        if let Some(ms) = get_u64(config, "callback.initial_interval_ms")? {
            callback.initial_interval_ms = ms;
        }
        if let Some(policy) = get_str(config, "callback.backoff")? {
            callback.backoff = policy
                .parse::<BackoffPolicy>()
                .map_err(ConfigError::ValidationError)?;
        }
        callback
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        let transport = match get_str(config, "transport.program")? {
            Some(program) => {
                let args = match lookup(config, "transport.args") {
                    None => Vec::new(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| invalid("transport.args", "a list of strings"))
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(_) => return Err(invalid("transport.args", "a list of strings")),
                };
                Some(CommandConfig {
                    program: program.to_string(),
                    args,
                })
            }
            None => None,
        };

        let session_group = lookup(config, "session.group")
            .map(|v| v.as_i64().ok_or_else(|| invalid("session.group", "an integer group id")))
            .transpose()?;

        let mut logging = defaults.logging;
        if let Some(level) = get_str(config, "logging.level")? {
            logging.level = level.to_string();
        }
        if let Some(format) = get_str(config, "logging.format")? {
            logging.format = format.parse::<LogFormat>().map_err(ConfigError::ValidationError)?;
        }

        Ok(Self {
            callback,
            transport,
            session_key: get_str(config, "session.key")?.map(str::to_string),
            session_group,
            logging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_config_gives_defaults() {
        let settings = ClientSettings::from_value(&json!({})).unwrap();
        assert_eq!(settings, ClientSettings::default());
    }

    #[test]
    fn test_full_config() {
        let settings = ClientSettings::from_value(&json!({
            "callback": {"loops": 20, "ms_per_loop": 250, "initial_interval_ms": 25, "backoff": "fixed"},
            "transport": {"program": "ssh", "args": ["server", "omecmd-server"]},
            "session": {"key": "abc", "group": -1},
            "logging": {"level": "debug", "format": "json"},
        }))
        .unwrap();

        assert_eq!(settings.callback, CallbackConfig {
            loops: 20,
            ms_per_loop: 250,
            initial_interval_ms: 25,
            backoff: BackoffPolicy::Fixed,
        });
        assert_eq!(settings.transport.unwrap().args, vec!["server", "omecmd-server"]);
        assert_eq!(settings.session_key.as_deref(), Some("abc"));
        assert_eq!(settings.session_group, Some(-1));
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_out_of_bounds_loops() {
        let err = ClientSettings::from_value(&json!({"callback": {"loops": 0}})).unwrap_err();
        assert!(err.to_string().contains("callback.loops"));
    }

    #[test]
    fn test_wrong_types() {
        assert!(ClientSettings::from_value(&json!({"callback": {"loops": "ten"}})).is_err());
        assert!(ClientSettings::from_value(&json!({"transport": {"program": "ssh", "args": "x"}})).is_err());
        assert!(ClientSettings::from_value(&json!({"callback": {"backoff": "linear"}})).is_err());
    }

    #[test]
    fn test_null_means_unset() {
        let settings = ClientSettings::from_value(&json!({"session": {"group": null}})).unwrap();
        assert_eq!(settings.session_group, None);
    }
}
