//! Configuration management for Chunkup.
//!
//! This module handles loading, saving, and managing Chunkup configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/chunkup/config.toml` |
//! | macOS | `~/Library/Application Support/Chunkup/config.toml` |
//! | Windows | `%APPDATA%\Chunkup\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use chunkup_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Server port: {}", config.server.port);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for Chunkup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings
    pub server: ServerConfig,
    /// Storage settings
    pub storage: StorageConfig,
    /// Client settings
    pub client: ClientConfig,
}

/// Server configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP port to listen on
    pub port: u16,
    /// Bind to localhost only
    pub localhost_only: bool,
    /// Largest accepted chunk payload in bytes
    pub max_chunk_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            localhost_only: false,
            max_chunk_size: crate::DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

/// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for uploads, sessions and the catalog
    pub root: PathBuf,
    /// Sessions untouched for longer than this are aborted by the server
    #[serde(with = "humantime_serde")]
    pub session_max_age: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            session_max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl StorageConfig {
    /// Get the default platform-specific storage root.
    #[must_use]
    pub fn default_root() -> PathBuf {
        directories::ProjectDirs::from("com", "chunkup", "Chunkup").map_or_else(
            || PathBuf::from(".chunkup"),
            |dirs| dirs.data_dir().join("storage"),
        )
    }
}

/// Client configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the upload server
    pub server_url: String,
    /// Chunk size for uploads
    pub chunk_size: u64,
    /// Attach a checksum to every chunk
    pub send_checksum: bool,
    /// Timeout for a single chunk request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://localhost:{}", crate::DEFAULT_PORT),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            send_checksum: true,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::ConfigError(format!("Failed to create config directory: {e}")))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(&path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values that would make uploads impossible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.client.chunk_size == 0 {
            return Err(Error::InvalidConfig {
                key: "client.chunk_size".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.server.max_chunk_size == 0 {
            return Err(Error::InvalidConfig {
                key: "server.max_chunk_size".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.client.chunk_size > self.server.max_chunk_size {
            return Err(Error::InvalidConfig {
                key: "client.chunk_size".into(),
                reason: format!(
                    "{} exceeds server.max_chunk_size ({})",
                    self.client.chunk_size, self.server.max_chunk_size
                ),
            });
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "chunkup", "Chunkup")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

/// Durations are written as `"120s"` and read back from `"<n>s"`, `"<n>m"`
/// or `"<n>h"`.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a duration written as `"<n>s"`, `"<n>m"` or `"<n>h"`.
///
/// # Errors
///
/// Returns [`Error::ConfigError`] for any other form.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (digits, multiplier) = if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 60 * 60)
    } else {
        return Err(Error::ConfigError(format!("invalid duration format: '{s}'")));
    };

    digits
        .parse::<u64>()
        .map(|n| Duration::from_secs(n.saturating_mul(multiplier)))
        .map_err(|e| Error::ConfigError(format!("invalid duration '{s}': {e}")))
}
