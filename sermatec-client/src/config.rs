//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SERMATEC_CONFIG)
//! 3. Environment variables
//!
//! Command-line flags are applied on top by the binary.

use crate::connection::{
    ConnectionConfig, DEFAULT_ATTEMPTS, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
    DEFAULT_WRITE_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use sermatec_protocol::DEFAULT_PORT;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inverter connection.
    pub connection: ConnectionSection,
    /// Protocol description files.
    pub protocol: ProtocolSection,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SERMATEC_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.connection.apply_env_overrides();
        self.protocol.apply_env_overrides();
    }

    /// Builds the connection configuration, failing when no host is set.
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let host = self
            .connection
            .host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ConfigError::ValidationError("inverter host is not set".into()))?;

        if self.connection.attempts == 0 {
            return Err(ConfigError::ValidationError(
                "attempts must be at least 1".into(),
            ));
        }

        Ok(ConnectionConfig::new(host)
            .with_port(self.connection.port)
            .with_connect_timeout(Duration::from_millis(self.connection.connect_timeout_ms))
            .with_write_timeout(Duration::from_millis(self.connection.write_timeout_ms))
            .with_read_timeout(Duration::from_millis(self.connection.read_timeout_ms))
            .with_attempts(self.connection.attempts))
    }
}

/// Connection section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// Inverter hostname or IP address.
    pub host: Option<String>,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Send/receive attempts per query.
    pub attempts: u32,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

impl ConnectionSection {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SERMATEC_HOST") {
            self.host = Some(host);
        }
        if let Ok(port) = std::env::var("SERMATEC_PORT") {
            if let Ok(p) = port.parse() {
                self.port = p;
            }
        }
        if let Ok(ms) = std::env::var("SERMATEC_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.connect_timeout_ms = ms;
            }
        }
        if let Ok(ms) = std::env::var("SERMATEC_WRITE_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.write_timeout_ms = ms;
            }
        }
        if let Ok(ms) = std::env::var("SERMATEC_READ_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.read_timeout_ms = ms;
            }
        }
        if let Ok(attempts) = std::env::var("SERMATEC_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.attempts = n;
            }
        }
    }
}

/// Protocol section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSection {
    /// Schema file replacing the bundled one.
    pub schema_file: Option<PathBuf>,
    /// Translation file replacing the bundled one.
    pub translations_file: Option<PathBuf>,
    /// Language of the bundled translation table.
    pub language: String,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            schema_file: None,
            translations_file: None,
            language: "en".to_string(),
        }
    }
}

impl ProtocolSection {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SERMATEC_PROTOCOL_FILE") {
            self.schema_file = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("SERMATEC_TRANSLATIONS_FILE") {
            self.translations_file = Some(PathBuf::from(path));
        }
        if let Ok(lang) = std::env::var("SERMATEC_LANGUAGE") {
            self.language = lang;
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}
