//! Configuration merge system
//!
//! Implements the 4-layer configuration merge:
//! 1. Built-in client defaults
//! 2. Host/user config (~/.config/omecmd/config.toml)
//! 3. Explicit config file (`--config`)
//! 4. CLI flags

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{host_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};
pub use settings::ClientSettings;
