//! # Configuration Management
//!
//! Centralized configuration for the frontend transport, the mux layer and the game loop.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`MMO_NETCORE_*` variables)
//!
//! ## Security Considerations
//! - The mux body limit bounds every allocation driven by a peer-declared length
//! - A bounded connection count keeps a flood of sockets from exhausting the process

use crate::core::packet::MAX_MUX_BODY_SIZE;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Number of mux channels the surrounding application uses (1 = game, 2 = chat)
pub const DEFAULT_CHANNEL_COUNT: u16 = 2;

/// First replication id handed out by a game
pub const DEFAULT_REPLICATION_ID_START: u64 = 1000;

/// Default interval between game ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Default time to wait for services during shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Frontend server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Mux channel configuration
    #[serde(default)]
    pub mux: MuxConfig,

    /// Game loop configuration
    #[serde(default)]
    pub game: GameConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
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

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `MMO_NETCORE_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("MMO_NETCORE_SERVER_ADDRESS") {
            self.server.address = addr;
        }

        if let Ok(addr) = std::env::var("MMO_NETCORE_PUBLIC_ADDRESS") {
            self.server.public_address = addr;
        }

        if let Ok(max) = std::env::var("MMO_NETCORE_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                self.server.max_connections = val;
            }
        }

        if let Ok(count) = std::env::var("MMO_NETCORE_CHANNEL_COUNT") {
            if let Ok(val) = count.parse::<u16>() {
                self.mux.channel_count = val;
            }
        }

        if let Ok(tick) = std::env::var("MMO_NETCORE_TICK_INTERVAL_MS") {
            if let Ok(val) = tick.parse::<u64>() {
                self.game.tick_interval = Duration::from_millis(val);
            }
        }

        if let Ok(level) = std::env::var("MMO_NETCORE_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                self.logging.log_level = val;
            }
        }
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
        errors.extend(self.mux.validate());
        errors.extend(self.game.validate());
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

/// Frontend server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:4306")
    pub address: String,

    /// Address advertised to clients after login
    pub public_address: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:4306"),
            public_address: String::from("127.0.0.1"),
            max_connections: 1000,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
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
                "Invalid server address format: '{}' (expected format: '0.0.0.0:4306')",
                self.address
            ));
        }

        if self.public_address.is_empty() {
            errors.push("Public address cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
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

/// Mux channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Highest valid mux channel id; channel 0 is always invalid
    pub channel_count: u16,

    /// Largest mux body accepted from a peer, in bytes
    pub max_body_size: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            max_body_size: MAX_MUX_BODY_SIZE,
        }
    }
}

impl MuxConfig {
    /// Validate mux configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.channel_count == 0 {
            errors.push("Channel count must be greater than 0".to_string());
        } else if self.channel_count > 16 {
            errors.push(format!(
                "Channel count too large: {} (maximum: 16)",
                self.channel_count
            ));
        }

        if self.max_body_size == 0 {
            errors.push("Max body size cannot be 0".to_string());
        } else if self.max_body_size > MAX_MUX_BODY_SIZE {
            errors.push(format!(
                "Max body size too large: {} bytes (the 24-bit header field allows {})",
                self.max_body_size, MAX_MUX_BODY_SIZE
            ));
        }

        errors
    }
}

/// Game loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GameConfig {
    /// Time between game ticks
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// First replication id handed out by the game
    pub replication_id_start: u64,

    /// Interval for logging a metrics snapshot from the game loop (0 disables it)
    #[serde(with = "duration_serde")]
    pub metrics_interval: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            replication_id_start: DEFAULT_REPLICATION_ID_START,
            metrics_interval: Duration::from_secs(60),
        }
    }
}

impl GameConfig {
    /// Validate game configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.tick_interval.is_zero() {
            errors.push("Tick interval must be greater than 0".to_string());
        } else if self.tick_interval.as_secs() > 1 {
            errors.push("Tick interval too long (maximum: 1s)".to_string());
        }

        if self.replication_id_start == 0 {
            errors.push("Replication id start must be greater than 0".to_string());
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

    /// Whether to include the module target in log lines
    pub with_target: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("mmo-netcore"),
            log_level: Level::INFO,
            with_target: false,
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
