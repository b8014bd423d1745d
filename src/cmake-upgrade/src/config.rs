//! Upgrade configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PREFERENCE_KEY, RELEASE_FEED_URL};

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("progress_threshold must be within (0, 1], got {0}")]
    InvalidThreshold(f64),
}

/// User configuration for upgrades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Hours to wait after "ask later" before prompting again
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: u32,

    /// Fraction of the expected size that must arrive between progress updates
    #[serde(default = "default_progress_threshold")]
    pub progress_threshold: f64,

    /// Bytes between progress updates when the size is unknown
    #[serde(default = "default_indeterminate_step")]
    pub indeterminate_step_bytes: u64,

    /// Storage key of the preference record
    #[serde(default = "default_preference_key")]
    pub preference_key: String,

    /// Elevation helper looked up on PATH
    #[serde(default = "default_elevation_helper")]
    pub elevation_helper: String,

    /// Installation prefix passed to the installer
    #[serde(default = "default_install_prefix")]
    pub install_prefix: PathBuf,

    /// Refuse to install when no checksum is published
    #[serde(default = "default_true")]
    pub require_checksum: bool,

    /// Seconds allowed to establish a connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Seconds allowed between two reads of the response body
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Release feed (GitHub "latest release" API endpoint)
    #[serde(default = "default_feed_url")]
    pub release_feed_url: String,

    /// Directory for downloaded installers (system temp dir when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_cooldown_hours() -> u32 {
    48
}

fn default_progress_threshold() -> f64 {
    0.01
}

fn default_indeterminate_step() -> u64 {
    1024 * 1024
}

fn default_preference_key() -> String {
    PREFERENCE_KEY.to_string()
}

fn default_elevation_helper() -> String {
    "pkexec".to_string()
}

fn default_install_prefix() -> PathBuf {
    PathBuf::from("/usr/local")
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_feed_url() -> String {
    RELEASE_FEED_URL.to_string()
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: default_cooldown_hours(),
            progress_threshold: default_progress_threshold(),
            indeterminate_step_bytes: default_indeterminate_step(),
            preference_key: default_preference_key(),
            elevation_helper: default_elevation_helper(),
            install_prefix: default_install_prefix(),
            require_checksum: true,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            release_feed_url: default_feed_url(),
            download_dir: None,
        }
    }
}

impl UpgradeConfig {
    /// Standard config location (`~/.config/cmake-upgrade/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cmake-upgrade").join("config.toml"))
    }

    /// Load config from the standard location, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the downloader cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.progress_threshold > 0.0 && self.progress_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(self.progress_threshold));
        }
        Ok(())
    }

    /// Cooldown window as a chrono duration.
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.cooldown_hours))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
