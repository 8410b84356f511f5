//! Effective configuration with full provenance
//!
//! The merged configuration plus where each layer came from. Secrets are
//! redacted in the rendered copy; settings are read from the unredacted one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::ClientSettings;

/// Schema version for effective_config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "omecmd/effective_config@1";

/// Host config location relative to `$HOME`
pub const HOST_CONFIG_RELATIVE: &str = ".config/omecmd/config.toml";

/// Default host config path, if `$HOME` is set
pub fn host_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(HOST_CONFIG_RELATIVE))
}

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Repo,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,

    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration, secrets redacted
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    /// Redacted key paths
    pub redactions: Vec<String>,

    /// Typed settings read from the unredacted merge
    #[serde(skip)]
    settings: ClientSettings,
}

/// Keys that contain secrets and should be redacted
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "private_key", "api_key", "credential"];

/// Full paths that are secrets despite an innocent key name
const SECRET_PATHS: &[&str] = &["session.key"];

impl EffectiveConfig {
    /// Build effective config from layers
    ///
    /// Missing files are skipped; unreadable or malformed ones are errors.
    pub fn build(
        host_config_path: Option<&Path>,
        repo_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        let files = [
            (ConfigOrigin::Host, host_config_path),
            (ConfigOrigin::Repo, repo_config_path),
        ];
        for (origin, path) in files {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let settings = ClientSettings::from_value(&merged)?;

        let mut config = merged;
        let redactions = Self::redact_secrets(&mut config);

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config,
            sources,
            redactions,
            settings,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let digest = hex::encode(Sha256::digest(&bytes));

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("{}: invalid UTF-8: {}", path.display(), e)))?;

        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    /// Convert TOML Value to JSON Value
    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => Value::Array(arr.into_iter().map(Self::toml_to_json).collect()),
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    /// Redact secrets in place, returning the redacted paths
    fn redact_secrets(value: &mut Value) -> Vec<String> {
        let mut redactions = Vec::new();
        Self::redact_recursive(value, String::new(), &mut redactions);
        redactions
    }

    fn redact_recursive(value: &mut Value, path: String, redactions: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let current_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };

                    let key_lower = key.to_lowercase();
                    let is_secret = SECRET_KEYS.iter().any(|s| key_lower.contains(s))
                        || SECRET_PATHS.contains(&current_path.as_str());

                    if is_secret && !val.is_object() && !val.is_array() && !val.is_null() {
                        *val = Value::String("[REDACTED]".to_string());
                        redactions.push(current_path);
                    } else {
                        Self::redact_recursive(val, current_path, redactions);
                    }
                }
            }
            Value::Array(arr) => {
                for (i, val) in arr.iter_mut().enumerate() {
                    Self::redact_recursive(val, format!("{}[{}]", path, i), redactions);
                }
            }
            _ => {}
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a rendered config value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.config, |current, part| current.get(part))
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
