//! # Configuration Management
//!
//! Centralized configuration for the replication protocol library.
//!
//! This module provides the stable wire constants plus structured
//! configuration for servers and clients: connection limits, per-tick
//! message budgets, and logging options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Security Considerations
//! - `messages_per_tick` bounds how much work a single datagram can demand
//! - `max_queued_datagrams` bounds per-peer inbound memory; exceeding it
//!   disconnects the peer

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current supported replication protocol version. Compared during the
/// Handshake; inequality is fatal to the connection.
pub const PROTOCOL_VERSION: u32 = 7;

/// Engine version advertised in the Handshake. Informational only; the
/// protocol version above is what gates connectivity.
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
pub const VERSION_REVISION: u8 = 0;
pub const VERSION_BUILD: u32 = 42;

/// Number of bytes a wire buffer grows by when a write would overflow its
/// current capacity.
pub const BUFFER_GROWTH_INCREMENT: usize = 256;

/// Max allowed datagram payload size (16 MB). Length prefixes claiming more
/// than this are rejected before allocation.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Main configuration structure that contains all configurable settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReplicationConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ReplicationConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables, starting from defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REPLICATION_MAX_CLIENTS") {
            if let Ok(parsed) = val.parse::<u32>() {
                config.server.max_clients = parsed;
            }
        }

        if let Ok(val) = std::env::var("REPLICATION_MESSAGES_PER_TICK") {
            if let Ok(parsed) = val.parse::<u32>() {
                config.server.messages_per_tick = parsed;
            }
        }

        if let Ok(val) = std::env::var("REPLICATION_TICK_INTERVAL_MS") {
            if let Ok(parsed) = val.parse::<u64>() {
                config.server.tick_interval_ms = parsed;
            }
        }

        if let Ok(val) = std::env::var("REPLICATION_LOG_LEVEL") {
            config.logging.level = val;
        }

        config
    }

    /// Apply overrides to the default configuration.
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Validate invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_clients == 0 {
            return Err(ProtocolError::ConfigError(
                "server.max_clients must be at least 1".into(),
            ));
        }

        if self.server.messages_per_tick == 0 {
            return Err(ProtocolError::ConfigError(
                "server.messages_per_tick must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Server-side settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Maximum number of simultaneously connected clients.
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,

    /// Upper bound on messages dispatched from a single connection per tick.
    #[serde(default = "default_messages_per_tick")]
    pub messages_per_tick: u32,

    /// Upper bound on undrained inbound datagrams per connection. A peer
    /// exceeding this is disconnected.
    #[serde(default = "default_max_queued_datagrams")]
    pub max_queued_datagrams: usize,

    /// Simulation tick interval in milliseconds. The tick loop itself lives
    /// outside this crate; this value is carried for the embedding.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Protocol version this server accepts. Overridable for testing
    /// version-mismatch paths.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: default_max_clients(),
            messages_per_tick: default_messages_per_tick(),
            max_queued_datagrams: default_max_queued_datagrams(),
            tick_interval_ms: default_tick_interval_ms(),
            protocol_version: default_protocol_version(),
        }
    }
}

/// Client-side settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Protocol version this client advertises in its Handshake.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,

    /// Upper bound on messages dispatched from a single datagram.
    #[serde(default = "default_messages_per_tick")]
    pub messages_per_tick: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            messages_per_tick: default_messages_per_tick(),
        }
    }
}

/// Logging settings consumed by `utils::logging`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level filter ("trace", "debug", "info", "warn", "error").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_max_clients() -> u32 {
    32
}

fn default_messages_per_tick() -> u32 {
    64
}

fn default_max_queued_datagrams() -> usize {
    16
}

fn default_tick_interval_ms() -> u64 {
    32
}

fn default_protocol_version() -> u32 {
    PROTOCOL_VERSION
}

fn default_log_level() -> String {
    "info".to_string()
}
