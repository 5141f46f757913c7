//! TOML-based configuration for the device server.
//!
//! Example file:
//!
//! ```toml
//! [server]
//! control_port = 5543
//! bind_address = "0.0.0.0"
//! max_tx_budget = 1048576
//! max_request_size = 1048576
//! hello_timeout_ms = 5000
//! log_level = "info"
//!
//! [streaming]
//! port_offset = 10
//! period_us = 2000
//! handshake_timeout_ms = 30000
//! poll_interval_ms = 50
//! max_send_failures = 1000
//! ```
//!
//! Every field has a serde default, so a partial file (or no file at all)
//! yields a working configuration.  The controller stream binds to
//! `control_port + port_offset` on the same address as the main channel.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::protocol::REPLY_HEADER_SIZE;
use thiserror::Error;

use crate::infrastructure::streaming::StreamingSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The values parsed but cannot be used.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

/// Main channel settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP port of the main channel.
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// IP address to bind both sockets to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Upper bound on the reply body the server will send, whatever the peer offers.
    #[serde(default = "default_max_tx_budget")]
    pub max_tx_budget: u32,
    /// Largest request body accepted; bigger bodies are drained and rejected.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: u32,
    /// How long a freshly connected peer may take to send its hello.
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Controller stream settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Stream port = `control_port + port_offset`.
    #[serde(default = "default_port_offset")]
    pub port_offset: u16,
    #[serde(default = "default_period_us")]
    pub period_us: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_send_failures")]
    pub max_send_failures: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_control_port() -> u16 {
    5543
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_max_tx_budget() -> u32 {
    0x10_0000
}
fn default_max_request_size() -> u32 {
    0x10_0000
}
fn default_hello_timeout_ms() -> u64 {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_port_offset() -> u16 {
    10
}
fn default_period_us() -> u64 {
    2000
}
fn default_handshake_timeout_ms() -> u64 {
    30_000
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_max_send_failures() -> u32 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_port: default_control_port(),
            bind_address: default_bind_address(),
            max_tx_budget: default_max_tx_budget(),
            max_request_size: default_max_request_size(),
            hello_timeout_ms: default_hello_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            port_offset: default_port_offset(),
            period_us: default_period_us(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_send_failures: default_max_send_failures(),
        }
    }
}

impl DeviceConfig {
    /// Parses `server.bind_address`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is not an IP address.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        let address = &self.server.bind_address;
        address
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad bind_address {address:?}")))
    }

    /// UDP port of the controller stream; `0` when the control port is `0`
    /// (both OS-assigned, as in tests).
    pub fn stream_port(&self) -> Result<u16, ConfigError> {
        if self.server.control_port == 0 {
            return Ok(0);
        }
        self.server
            .control_port
            .checked_add(self.streaming.port_offset)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "control_port {} + port_offset {} overflows",
                    self.server.control_port, self.streaming.port_offset
                ))
            })
    }

    /// Checks the values a running server depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_ip()?;
        self.stream_port()?;
        if (self.server.max_tx_budget as usize) <= REPLY_HEADER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_tx_budget must exceed the {REPLY_HEADER_SIZE}-byte reply header"
            )));
        }
        if self.server.hello_timeout_ms == 0 {
            return Err(ConfigError::Invalid("hello_timeout_ms must be non-zero".into()));
        }
        if self.streaming.period_us == 0 {
            return Err(ConfigError::Invalid("period_us must be non-zero".into()));
        }
        if self.streaming.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Builds the streaming worker settings.
    pub fn streaming_settings(&self) -> Result<StreamingSettings, ConfigError> {
        Ok(StreamingSettings {
            bind: self.bind_ip()?,
            port: self.stream_port()?,
            period: Duration::from_micros(self.streaming.period_us),
            handshake_timeout: Duration::from_millis(self.streaming.handshake_timeout_ms),
            poll_interval: Duration::from_millis(self.streaming.poll_interval_ms),
            max_send_failures: self.streaming.max_send_failures,
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `DeviceConfig` from `path`, returning defaults if the file does not
/// exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<DeviceConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeviceConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &DeviceConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
