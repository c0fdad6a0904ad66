//! Configuration for the archiver
//!
//! Two layers:
//! 1. [`ScrapeConfig`], loaded from an optional `chan_archiver.toml`
//! 2. [`RunConfig`], the per-invocation inputs built once at the CLI boundary

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default config file name, looked up in the working directory
pub const CONFIG_NAME: &str = "chan_archiver.toml";

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Config file already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Paths {
    pub attachments_directory: String,
    pub failed_threads_file: String,
    pub log_directory: String,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            attachments_directory: "attachments".to_string(),
            failed_threads_file: "failed_threads.txt".to_string(),
            log_directory: "logs".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Network {
    /// Per-request timeout, applied to metadata and attachment fetches alike
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Cap on in-flight attachment fetches per thread, 0 leaves it to the transport
    pub max_concurrent_downloads: usize,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: format!("chan_archiver/{}", env!("CARGO_PKG_VERSION")),
            max_concurrent_downloads: 0,
        }
    }
}

/// Hosts the metadata and attachment URLs are derived against
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Endpoints {
    pub metadata_host: String,
    pub media_host: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            metadata_host: "a.4cdn.org".to_string(),
            media_host: "i.4cdn.org".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Logging {
    pub log_level: String,
    /// "text" or "json"
    pub log_format: String,
    pub log_to_file: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            log_to_file: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ScrapeConfig {
    pub paths: Paths,
    pub network: Network,
    pub endpoints: Endpoints,
    pub logging: Logging,
}

impl ScrapeConfig {
    /// Load the config at `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            debug!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config to `path`, never overwriting an existing file
    pub fn write_default(path: &Path) -> ConfigResult<()> {
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path.display().to_string()));
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        fs::write(path, toml_string)?;
        Ok(())
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.network.timeout_secs == 0 {
            return Err(ConfigError::Invalid("network.timeout_secs must be positive".to_string()));
        }
        if self.endpoints.metadata_host.trim().is_empty() || self.endpoints.media_host.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint hosts must not be empty".to_string()));
        }
        if !matches!(self.logging.log_format.as_str(), "text" | "json") {
            warn!(
                "Unknown log format {:?}, falling back to text",
                self.logging.log_format
            );
        }
        Ok(())
    }

    pub fn attachments_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.attachments_directory)
    }

    pub fn failed_threads_path(&self) -> PathBuf {
        PathBuf::from(&self.paths.failed_threads_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.log_directory)
    }
}

/// Inputs of one invocation, constructed once at the boundary and passed down
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Locators given directly, not yet validated
    pub locators: Vec<String>,
    /// File with one locator per line
    pub input_file: Option<PathBuf>,
    /// Rediscover locators from the folders already on disk
    pub refresh: bool,
}

impl RunConfig {
    /// True when no locator source was supplied at all
    pub fn is_empty(&self) -> bool {
        self.locators.is_empty() && self.input_file.is_none() && !self.refresh
    }
}
