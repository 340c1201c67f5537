//! Configuration management for formsync.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::trigger::SYNC_FORM_TAG;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "formsync";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "queue.db";

/// Environment variable prefix.
const ENV_PREFIX: &str = "FORMSYNC_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FORMSYNC_`, nested keys split on
///    `__`, e.g. `FORMSYNC_REMOTE__BASE_URL`)
/// 2. TOML config file at `~/.config/formsync/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote endpoint configuration.
    pub remote: RemoteConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Sync configuration.
    pub sync: SyncConfig,
    /// Connectivity configuration.
    pub connectivity: ConnectivityConfig,
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the submission service.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the queue database.
    /// Defaults to `~/.local/share/formsync/queue.db`
    pub database_path: Option<PathBuf>,
}

/// Sync-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Background sync tag registered for queued submissions.
    pub tag: String,
    /// Remote rejections tolerated before a record is dead-lettered.
    /// Set to 0 to retry forever.
    pub max_attempts: u32,
    /// Run a sync pass when connectivity comes back and the queue is not empty.
    pub sync_on_reconnect: bool,
    /// How often the daemon looks for registrations made by other processes.
    pub registration_poll_secs: u64,
}

/// Connectivity probe configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Timeout of a single reachability probe in milliseconds.
    pub probe_timeout_ms: u64,
    /// Interval between reachability probes in the daemon, in seconds.
    pub probe_interval_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tag: SYNC_FORM_TAG.to_string(),
            max_attempts: 10,
            sync_on_reconnect: true,
            registration_poll_secs: 10,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2_000,
            probe_interval_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from defaults, the config file (`config_path`, or
    /// the default location) and `FORMSYNC_` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        match Url::parse(&self.remote.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(Error::ConfigValidation {
                    message: format!(
                        "remote.base_url must be http or https, got '{}'",
                        url.scheme()
                    ),
                });
            }
            Err(e) => {
                return Err(Error::ConfigValidation {
                    message: format!("remote.base_url '{}' is invalid: {e}", self.remote.base_url),
                });
            }
        }

        if self.remote.request_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "request_timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.sync.tag.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "sync.tag must not be empty".to_string(),
            });
        }

        if self.sync.registration_poll_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "registration_poll_secs must be greater than 0".to_string(),
            });
        }

        if self.connectivity.probe_timeout_ms == 0 || self.connectivity.probe_interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "probe_timeout_ms and probe_interval_secs must be greater than 0"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs)
    }

    /// Get the probe timeout as a Duration.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity.probe_timeout_ms)
    }

    /// Get the probe interval as a Duration.
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity.probe_interval_secs)
    }

    /// Get the registration poll interval as a Duration.
    #[must_use]
    pub fn registration_poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.registration_poll_secs)
    }
}
