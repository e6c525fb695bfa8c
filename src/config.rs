//! TOML configuration for the sqlfs binary
//!
//! The configuration is an explicit value constructed at startup and passed
//! into the tree bootstrap; nothing in the library reads ambient global
//! state. A minimal file looks like:
//!
//! ```toml
//! [store]
//! url = "sqlite:///var/lib/sqlfs/files.db"
//!
//! [fuse]
//! ttl_secs = 1
//! allow_other = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Top-level configuration for a sqlfs process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub fuse: FuseConfig,
}

/// Record store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database URL, e.g. `sqlite:///var/lib/sqlfs/files.db`
    pub url: Url,
}

/// Kernel-facing mount options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuseConfig {
    /// Attribute and entry cache TTL handed to the kernel, in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Allow other users to access the mount
    #[serde(default)]
    pub allow_other: bool,
}

fn default_ttl_secs() -> u64 {
    1
}

impl Default for FuseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            allow_other: false,
        }
    }
}

impl FuseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Build a configuration from a bare store URL, using mount defaults
    pub fn from_store_url(url: Url) -> Self {
        Self {
            store: StoreConfig { url },
            fuse: FuseConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
