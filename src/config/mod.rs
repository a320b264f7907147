//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NetconfError, Result};
use crate::message::DEFAULT_CAPABILITIES;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| NetconfError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| NetconfError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Default config file location (`<config dir>/netconf/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("netconf").join("config.toml"))
    }

    /// Load the default config file if it exists, then apply env overrides
    pub fn load() -> Result<Self> {
        let config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Apply `NETCONF_*` environment variables on top of this config
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("NETCONF_RPC_TIMEOUT_SECS") {
            if let Ok(val) = val.parse() {
                self.session.rpc_timeout_secs = val;
            }
        }
        if let Ok(val) = std::env::var("NETCONF_CLOSE_TIMEOUT_SECS") {
            if let Ok(val) = val.parse() {
                self.session.close_timeout_secs = val;
            }
        }
        if let Ok(val) = std::env::var("NETCONF_DELIVERY_QUEUE_SIZE") {
            if let Ok(val) = val.parse() {
                self.session.delivery_queue_size = val;
            }
        }
        if let Ok(val) = std::env::var("NETCONF_MAX_MESSAGE_SIZE") {
            if let Ok(val) = val.parse() {
                self.transport.max_message_size = val;
            }
        }

        self
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default bound on synchronous RPC waits, in seconds
    pub rpc_timeout_secs: u64,

    /// Bound on joining the receive loop during close, in seconds
    pub close_timeout_secs: u64,

    /// Capabilities advertised by `send_default_hello`
    pub capabilities: Vec<String>,

    /// Decoded messages buffered between reading and delivery
    pub delivery_queue_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_secs: 30,
            close_timeout_secs: 5,
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| (*c).to_string()).collect(),
            delivery_queue_size: 128,
        }
    }
}

impl SessionConfig {
    /// Default RPC timeout as a duration
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Close timeout as a duration
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    /// Delivery queue capacity, at least one
    pub fn delivery_queue_size(&self) -> usize {
        self.delivery_queue_size.max(1)
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest inbound message accepted, in bytes
    pub max_message_size: usize,

    /// Largest outbound chunk under 1.1 framing, in bytes
    pub max_chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024, // 16 MiB
            max_chunk_size: 64 * 1024,
        }
    }
}
