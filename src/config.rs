//! # Configuration Management
//!
//! Centralized configuration for the chat relay protocol core.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`RELAY_CHAT_*`)
//!
//! The segment size is part of the wire contract and cannot be tuned; it is carried
//! here only so a config file that disagrees with it fails validation loudly.

use crate::error::{ProtocolError, Result};
use crate::protocol::message::MAX_SEGMENT_SIZE;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// Default number of simultaneous active outgoing transfers per sender
pub const MAX_CONCURRENT_FILE_SENDS: usize = 3;

/// Default upper bound on one buffered frame (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProtocolConfig {
    /// Server-side login and moderation settings
    #[serde(default)]
    pub server: ServerConfig,

    /// File transfer settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RELAY_CHAT_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(password) = std::env::var("RELAY_CHAT_SERVER_PASSWORD") {
            config.server.server_password = Some(password);
        }

        if let Ok(password) = std::env::var("RELAY_CHAT_ADMIN_PASSWORD") {
            config.server.admin_password = Some(password);
        }

        if let Ok(limit) = std::env::var("RELAY_CHAT_MAX_CONCURRENT_FILE_SENDS") {
            let val = limit.parse::<usize>().map_err(|e| {
                ProtocolError::ConfigError(format!(
                    "Invalid RELAY_CHAT_MAX_CONCURRENT_FILE_SENDS '{limit}': {e}"
                ))
            })?;
            config.transfer.max_concurrent_file_sends = val;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.transfer.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:9000"), used by the accept loop
    pub address: String,

    /// Password every client must present; `None` admits anyone
    pub server_password: Option<String>,

    /// Password unlocking the admin sub-protocol; `None` disables admin login
    pub admin_password: Option<String>,

    /// Longest accepted username, in characters
    pub max_username_len: usize,

    /// Longest accepted server password, in characters
    pub max_password_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            server_password: None,
            admin_password: None,
            max_username_len: 20,
            max_password_len: 32,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8080')",
                self.address
            ));
        }

        if self.max_username_len == 0 {
            errors.push("Max username length must be greater than 0".to_string());
        }

        if self.max_password_len == 0 {
            errors.push("Max password length must be greater than 0".to_string());
        }

        if let Some(password) = &self.server_password {
            if password.chars().count() > self.max_password_len {
                errors.push(format!(
                    "Server password longer than max_password_len ({})",
                    self.max_password_len
                ));
            }
        }

        if matches!(&self.admin_password, Some(p) if p.is_empty()) {
            errors.push("Admin password cannot be empty (omit it to disable admin login)".to_string());
        }

        errors
    }
}

/// File transfer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Active (non-terminal) outgoing transfers allowed per sender
    pub max_concurrent_file_sends: usize,

    /// Segment size in bytes; must equal the wire constant
    pub max_segment_size: usize,

    /// Upper bound on a single buffered frame in the streaming codec
    pub max_frame_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_file_sends: MAX_CONCURRENT_FILE_SENDS,
            max_segment_size: MAX_SEGMENT_SIZE,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl TransferConfig {
    /// Validate transfer configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_concurrent_file_sends == 0 {
            errors.push("Max concurrent file sends must be greater than 0".to_string());
        } else if self.max_concurrent_file_sends > 1_000 {
            errors.push(format!(
                "Max concurrent file sends too large: {} (max recommended: 1,000)",
                self.max_concurrent_file_sends
            ));
        }

        if self.max_segment_size != MAX_SEGMENT_SIZE {
            errors.push(format!(
                "Segment size is fixed by the wire format at {MAX_SEGMENT_SIZE} bytes (got {})",
                self.max_segment_size
            ));
        }

        // A data frame carries a segment plus its header strings
        if self.max_frame_size < 2 * MAX_SEGMENT_SIZE {
            errors.push(format!(
                "Max frame size too small: {} (minimum: {})",
                self.max_frame_size,
                2 * MAX_SEGMENT_SIZE
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("relay-chat"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
