//! Connection profile configuration.
//!
//! The CLI can read connection parameters from an `mlink.toml` file
//! instead of taking every flag on the command line. The file holds one
//! `[profile.<name>]` table per target engine:
//!
//! ```toml
//! [profile.dev]
//! engine = "yottadb"
//! path = "/usr/local/lib/yottadb/r202"
//!
//! [profile.hospital]
//! engine = "iris"
//! path = "/opt/iris/mgr"
//! username = "_SYSTEM"
//! password = "SYS"
//! namespace = "USER"
//! ```
//!
//! A profile carries the same nine fields the open request carries, in
//! the same meaning; anything left out defaults to empty.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the config file the loader searches for.
pub const CONFIG_FILE: &str = "mlink.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("No profile named '{0}' in the config file")]
    UnknownProfile(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root structure matching mlink.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MlinkConfig {
    /// Connection profiles by name
    #[serde(default)]
    pub profile: HashMap<String, ProfileConfig>,
}

/// One named connection profile.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfileConfig {
    /// Engine name: `cache`, `iris`, or `yottadb`
    #[serde(default)]
    pub engine: String,

    /// Path to the engine installation
    #[serde(default)]
    pub path: String,

    /// Credentials, used by Cache/IRIS authentication
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Namespace to switch to after open (Cache/IRIS)
    #[serde(default)]
    pub namespace: String,

    /// Device strings for the authentication profile
    #[serde(default)]
    pub input_device: String,

    #[serde(default)]
    pub output_device: String,

    /// Debug trace sink: a file path, `stderr`, or `stdout`
    #[serde(default)]
    pub debug: String,

    /// Environment block applied before the engine loads, one
    /// `NAME=VALUE` per line
    #[serde(default)]
    pub environment: String,
}

impl ProfileConfig {
    /// The profile's fields in open-request order: engine, path,
    /// username, password, namespace, input device, output device,
    /// debug spec, environment block.
    pub fn arguments(&self) -> [&str; 9] {
        [
            &self.engine,
            &self.path,
            &self.username,
            &self.password,
            &self.namespace,
            &self.input_device,
            &self.output_device,
            &self.debug,
            &self.environment,
        ]
    }
}

impl MlinkConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: MlinkConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given
    /// directory. Reaching the filesystem root without a hit yields an
    /// empty config rather than an error.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> ConfigResult<&ProfileConfig> {
        self.profile
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// Profile names in listing order.
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profile.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
