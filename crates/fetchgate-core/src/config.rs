//! Client configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/fetchgate/config.toml)
//! 3. Environment variables (FETCHGATE_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "FETCHGATE";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for persisted client state (credentials)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the HTTP API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Push-event WebSocket URL (optional)
    #[serde(default)]
    pub events_url: Option<String>,

    /// Path of the token refresh endpoint, relative to `base_url`
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long unused cache entries are kept after the last subscriber leaves
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Default maximum age of cached query results
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            base_url: default_base_url(),
            events_url: None,
            refresh_path: default_refresh_path(),
            request_timeout_ms: default_request_timeout_ms(),
            grace_period_secs: default_grace_period_secs(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (FETCHGATE_DATA_DIR, FETCHGATE_BASE_URL, ...)
    /// 2. Config file (~/.config/fetchgate/config.toml or FETCHGATE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_BASE_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.base_url = val;
            }
        }

        // Empty string disables push events
        if let Ok(val) = std::env::var(format!("{}_EVENTS_URL", ENV_PREFIX)) {
            self.events_url = if val.is_empty() { None } else { Some(val) };
        }

        // Unparseable values are ignored
        if let Ok(val) = std::env::var(format!("{}_TIMEOUT_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.request_timeout_ms = ms;
            }
        }
    }

    /// Create the data directory if it is missing
    pub fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with FETCHGATE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fetchgate")
            .join("config.toml")
    }

    /// Get the path of the persisted client state file
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fetchgate")
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_grace_period_secs() -> u64 {
    60
}

fn default_max_age_secs() -> u64 {
    60
}
