//! # Configuration Management
//!
//! Centralized configuration for the HostConnect server.
//!
//! This module provides structured configuration for the listener, the
//! handshake and session timeouts, keepalive timing, payload limits, identity
//! defaults and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Timing Considerations
//! - Hosts send a keepalive every 60s; the 75s session timeout gives 15s of
//!   slack before a silent host is dropped
//! - The server's own keepalive interval (120s) must stay below the
//!   dead-peer timeout

use crate::error::{ProtocolError, Result};
use crate::store::GroupId;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed HostStatus payload (16 MB)
pub const MAX_HOST_STATUS_SIZE: usize = 16 * 1024 * 1024;

/// Group every first-seen computer is added to
pub const DEFAULT_GROUP_ID: GroupId = 2;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HostConnectConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Handshake and session I/O bounds
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Outbound keepalive timing
    #[serde(default)]
    pub keepalive: KeepAliveConfig,

    /// Payload limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Identity defaults for new computers
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HostConnectConfig {
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

        if let Ok(addr) = std::env::var("HOST_CONNECT_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(max) = std::env::var("HOST_CONNECT_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_connections = val;
            }
        }

        if let Ok(timeout) = std::env::var("HOST_CONNECT_AUTH_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.timeouts.auth = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("HOST_CONNECT_SESSION_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.timeouts.session = Duration::from_millis(val);
            }
        }

        if let Ok(interval) = std::env::var("HOST_CONNECT_KEEPALIVE_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.keepalive.interval = Duration::from_millis(val);
            }
        }

        if let Ok(group) = std::env::var("HOST_CONNECT_DEFAULT_GROUP_ID") {
            if let Ok(val) = group.parse::<GroupId>() {
                config.identity.default_group_id = val;
            }
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
        errors.extend(self.timeouts.validate());
        errors.extend(self.keepalive.validate());
        errors.extend(self.limits.validate());
        errors.extend(self.logging.validate());

        // The dead-peer bound must leave room for at least one keepalive.
        if self.keepalive.interval >= self.keepalive.timeout {
            errors.push("Keepalive interval must be shorter than keepalive timeout".to_string());
        }

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

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:8443")
    pub address: String,

    /// Maximum number of concurrent host connections
    pub max_connections: usize,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8443"),
            max_connections: 10_000,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
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
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8443')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 1_000_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Read/write bounds applied to the host socket
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Bound for every read and write before authentication completes
    #[serde(with = "duration_serde")]
    pub auth: Duration,

    /// Bound for every read and write once authenticated
    #[serde(with = "duration_serde")]
    pub session: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            auth: timeout::AUTH_TIMEOUT,
            session: timeout::SESSION_TIMEOUT,
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.auth.as_millis() < 100 {
            errors.push("Auth timeout too short (minimum: 100ms)".to_string());
        } else if self.auth.as_secs() > 300 {
            errors.push("Auth timeout too long (maximum: 300s)".to_string());
        }

        if self.session.as_millis() < 100 {
            errors.push("Session timeout too short (minimum: 100ms)".to_string());
        } else if self.session.as_secs() > 3600 {
            errors.push("Session timeout too long (maximum: 1 hour)".to_string());
        }

        errors
    }
}

/// Outbound keepalive timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeepAliveConfig {
    /// Outbound idle time before a keepalive is sent
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Outbound idle time before the host is considered dead
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// How often the keepalive timer checks
    #[serde(with = "duration_serde")]
    pub check_interval: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: timeout::KEEPALIVE_INTERVAL,
            timeout: timeout::KEEPALIVE_TIMEOUT,
            check_interval: timeout::KEEPALIVE_CHECK_INTERVAL,
        }
    }
}

impl KeepAliveConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.interval.as_millis() < 100 {
            errors.push("Keepalive interval too short (minimum: 100ms)".to_string());
        } else if self.interval.as_secs() > 3600 {
            errors.push("Keepalive interval too long (maximum: 1 hour)".to_string());
        }

        if self.check_interval.as_millis() < 10 {
            errors.push("Keepalive check interval too short (minimum: 10ms)".to_string());
        } else if self.check_interval > self.interval {
            errors.push("Keepalive check interval cannot exceed the keepalive interval".to_string());
        }

        errors
    }
}

/// Payload limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Largest HostStatus payload accepted, in bytes
    pub max_host_status_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_host_status_size: MAX_HOST_STATUS_SIZE,
        }
    }
}

impl LimitsConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_host_status_size == 0 {
            errors.push("Max host status size cannot be 0".to_string());
        } else if self.max_host_status_size > i32::MAX as usize {
            errors.push(format!(
                "Max host status size too large: {} bytes (wire limit: {} bytes)",
                self.max_host_status_size,
                i32::MAX
            ));
        }

        errors
    }
}

/// Identity defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Group membership asserted on every successful handshake
    pub default_group_id: GroupId,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            default_group_id: DEFAULT_GROUP_ID,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("host-connect"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
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

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
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
