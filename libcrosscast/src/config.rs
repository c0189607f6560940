//! Configuration management for Crosscast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::types::DEFAULT_MAX_RETRIES;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Request timeout for individual HTTP calls, in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Per-platform deadline for a single publish attempt, in seconds.
    #[serde(default = "default_platform_timeout")]
    pub platform_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Tokens expiring within this window are refreshed before use.
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_secs: i64,
}

fn default_http_timeout() -> u64 {
    30
}

fn default_platform_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_refresh_buffer() -> i64 {
    300
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            platform_timeout_secs: default_platform_timeout(),
            max_retries: default_max_retries(),
            refresh_buffer_secs: default_refresh_buffer(),
        }
    }
}

/// OAuth app registrations, one optional block per platform.
///
/// Discord uses webhooks rather than OAuth, so it has no entry here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub linkedin: Option<OAuthApp>,
    pub instagram: Option<OAuthApp>,
    pub twitter: Option<OAuthApp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/crosscast/crosscast.db".to_string(),
            },
            publish: PublishConfig::default(),
            oauth: OAuthConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosscast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("crosscast"))
}
