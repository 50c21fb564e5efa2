use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Top-level workspace configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JvmapConfig {
    pub cache: CacheConfig,
    pub broker: BrokerConfig,
    pub logging: LoggingConfig,
}

/// Identity cache sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Seconds an entry may go unused before eviction.
    pub idle_seconds: u64,
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_seconds: 1,
            max_capacity: 1_000_000,
        }
    }
}

/// Mapping event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Producers block once this many events are waiting.
    pub queue_capacity: usize,
    /// Events applied per store transaction.
    pub batch_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            batch_size: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when neither `RUST_LOG` nor
    /// `--log-level` is given.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load and parse a config from a TOML file.
pub fn load_config(path: &Path) -> Result<JvmapConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content).map_err(|err| match err {
        Error::Config(message) => Error::Config(format!("{}: {}", path.display(), message)),
        other => other,
    })
}

/// Parse a config from a TOML string.
pub fn parse_config(toml_str: &str) -> Result<JvmapConfig> {
    let config: JvmapConfig =
        toml::from_str(toml_str).map_err(|err| Error::Config(err.to_string()))?;
    if config.broker.queue_capacity == 0 {
        return Err(Error::Config("broker.queue_capacity must be >= 1".to_string()));
    }
    if config.broker.batch_size == 0 {
        return Err(Error::Config("broker.batch_size must be >= 1".to_string()));
    }
    Ok(config)
}

/// Config files looked up in a workspace root; the first present wins.
const CONFIG_FILENAMES: &[&str] = &[".jvmap/config.toml", "jvmap.toml"];

/// Resolve the workspace config. An explicit `config_override` must exist.
/// Without one, the first of [`CONFIG_FILENAMES`] found under `workspace`
/// is loaded, and defaults apply when there is none.
pub fn resolve_config(workspace: &Path, config_override: Option<&Path>) -> Result<JvmapConfig> {
    let path = match config_override {
        Some(path) if !path.is_file() => {
            return Err(Error::Config(format!(
                "config file {} does not exist",
                path.display()
            )))
        }
        Some(path) => path.to_path_buf(),
        None => {
            let found = CONFIG_FILENAMES
                .iter()
                .map(|name| workspace.join(name))
                .find(|candidate| candidate.is_file());
            match found {
                Some(path) => path,
                None => {
                    debug!(workspace = %workspace.display(), "no config file, using defaults");
                    return Ok(JvmapConfig::default());
                }
            }
        }
    };
    debug!(path = %path.display(), "loading config");
    load_config(&path)
}
