//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [host]                   # listener side
//! port = 8090
//! request_timeout_secs = 30
//!
//! [client]                 # orchestrator side
//! url = "ws://127.0.0.1:8090/bridge"
//! client_name = "my-agent"
//!
//! [logging]
//! json_file = true
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default listener port.
pub const DEFAULT_PORT: u16 = 8090;

/// Default listener bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default WebSocket path on the host.
pub const DEFAULT_PATH: &str = "/bridge";

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Lowest request timeout a configuration may select.
pub const MIN_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default capacity of the host's work queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Clamp a configured timeout to the floor.
pub fn clamp_request_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.max(MIN_REQUEST_TIMEOUT_SECS))
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host (listener) settings.
    pub host: Option<HostConfig>,
    /// Client (orchestrator) settings.
    pub client: Option<ClientConfig>,
    /// Logging settings.
    pub logging: Option<LoggingConfig>,
}

impl BridgeConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// A config with every section filled with defaults.
    pub fn with_defaults() -> Self {
        Self {
            host: Some(HostConfig::default()),
            client: Some(ClientConfig::default()),
            logging: Some(LoggingConfig::default()),
        }
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: BridgeConfig) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.client.is_some() {
            self.client = other.client;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective host settings.
    pub fn host(&self) -> HostConfig {
        self.host.clone().unwrap_or_default()
    }

    /// Effective client settings.
    pub fn client(&self) -> ClientConfig {
        self.client.clone().unwrap_or_default()
    }

    /// Effective logging settings.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Listener-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address to bind to.
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
    /// WebSocket upgrade path.
    pub path: String,
    /// Overall per-call deadline enforced by the dispatcher.
    pub request_timeout_secs: u64,
    /// Capacity of the execution context's work queue.
    pub queue_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl HostConfig {
    /// Socket address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                field: "host.bind".to_string(),
                value: self.bind.clone(),
                reason: e.to_string(),
            })
    }

    /// Dispatcher timeout, never below the floor.
    pub fn request_timeout(&self) -> Duration {
        clamp_request_timeout(self.request_timeout_secs)
    }

    /// Work queue capacity, at least one slot.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    /// WebSocket path, always with a leading slash.
    pub fn ws_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrator-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the host.
    pub url: String,
    /// Optional name presented to the host for diagnostics.
    pub client_name: Option<String>,
    /// Default per-request timeout.
    pub request_timeout_secs: u64,
    /// Deadline for opening the connection.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://{}:{}{}", DEFAULT_BIND, DEFAULT_PORT, DEFAULT_PATH),
            client_name: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Default request timeout, never below the floor.
    pub fn request_timeout(&self) -> Duration {
        clamp_request_timeout(self.request_timeout_secs)
    }

    /// Connect timeout (at least one second).
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rolling JSON log files. Defaults to `logs/` under the
    /// user config directory.
    pub directory: Option<PathBuf>,
    /// Whether to write the JSON log file at all.
    pub json_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            json_file: true,
        }
    }
}
