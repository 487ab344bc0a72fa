// rust/dispatcher-core/src/config.rs

//! Configuration management for the data service dispatcher.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DispatcherError, Result};

// Top-level dispatcher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub storage: StorageConfig,
    pub dispatcher: DispatcherSettings,
    pub client: ClientConfig,
}

// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Base path that relative snapshot directories resolve against.
    pub base_path: PathBuf,
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
}

/// How the data service is deployed relative to its trainers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Workers run on the same hosts as the trainers.
    #[default]
    Colocated,
    /// Workers run on dedicated hosts.
    Remote,
    /// A mix of colocated and remote workers.
    Hybrid,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Colocated => "colocated",
            Self::Remote => "remote",
            Self::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

impl FromStr for DeploymentMode {
    type Err = DispatcherError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "colocated" => Ok(Self::Colocated),
            "remote" => Ok(Self::Remote),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(DispatcherError::config(format!(
                "unknown deployment mode '{other}'"
            ))),
        }
    }
}

// Dispatcher behaviour options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Directory for dispatcher bookkeeping that must survive restarts.
    /// When unset, started snapshots are not recovered after a restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    /// Deployment mode reported by `GetDataServiceConfig`.
    pub deployment_mode: DeploymentMode,
    /// Workers silent for longer than this are marked unhealthy.
    pub worker_timeout_ms: u64,
    /// Interval between worker timeout sweeps.
    pub heartbeat_interval_ms: u64,
    /// Maximum number of snapshots a worker streams at once (0 = unlimited).
    pub worker_max_concurrent_snapshots: usize,
}

/// Settings for clients that talk to a remote dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Dispatcher address as `host:port`.
    pub address: String,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Connection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Initial delay between connection attempts in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            buffer_size: 64 * 1024, // 64 KB
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            work_dir: None,
            deployment_mode: DeploymentMode::Colocated,
            worker_timeout_ms: 30_000,
            heartbeat_interval_ms: 5_000,
            worker_max_concurrent_snapshots: 0,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "localhost:50051".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 100,
        }
    }
}

impl FromStr for DispatcherConfig {
    type Err = DispatcherError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| DispatcherError::config_with_source("failed to parse TOML config", e))
    }
}

impl DispatcherConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DispatcherError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `DSD_` and use underscores
    // to separate nested fields. For example:
    // - `DSD_STORAGE_BASE_PATH` overrides `storage.base_path`
    // - `DSD_DISPATCHER_WORK_DIR` overrides `dispatcher.work_dir`
    // - `DSD_DISPATCHER_DEPLOYMENT_MODE` overrides `dispatcher.deployment_mode`
    // - `DSD_CLIENT_ADDRESS` overrides `client.address`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Storage overrides
        if let Ok(val) = std::env::var("DSD_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("DSD_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }

        // Dispatcher overrides
        if let Ok(val) = std::env::var("DSD_DISPATCHER_WORK_DIR") {
            self.dispatcher.work_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("DSD_DISPATCHER_DEPLOYMENT_MODE") {
            if let Ok(v) = val.parse() {
                self.dispatcher.deployment_mode = v;
            }
        }
        if let Ok(val) = std::env::var("DSD_DISPATCHER_WORKER_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.dispatcher.worker_timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("DSD_DISPATCHER_HEARTBEAT_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                self.dispatcher.heartbeat_interval_ms = v;
            }
        }
        if let Ok(val) = std::env::var("DSD_DISPATCHER_WORKER_MAX_CONCURRENT_SNAPSHOTS") {
            if let Ok(v) = val.parse() {
                self.dispatcher.worker_max_concurrent_snapshots = v;
            }
        }

        // Client overrides
        if let Ok(val) = std::env::var("DSD_CLIENT_ADDRESS") {
            self.client.address = val;
        }
        if let Ok(val) = std::env::var("DSD_CLIENT_CONNECT_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.client.connect_timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("DSD_CLIENT_REQUEST_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.client.request_timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("DSD_CLIENT_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                self.client.max_reconnect_attempts = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(DispatcherError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        if self.dispatcher.worker_timeout_ms == 0 {
            return Err(DispatcherError::config(
                "dispatcher.worker_timeout_ms must be greater than 0",
            ));
        }
        if self.dispatcher.heartbeat_interval_ms == 0 {
            return Err(DispatcherError::config(
                "dispatcher.heartbeat_interval_ms must be greater than 0",
            ));
        }
        if self.dispatcher.heartbeat_interval_ms > self.dispatcher.worker_timeout_ms {
            return Err(DispatcherError::config(
                "dispatcher.heartbeat_interval_ms must not exceed dispatcher.worker_timeout_ms",
            ));
        }

        if self.client.address.is_empty() {
            return Err(DispatcherError::config("client.address must not be empty"));
        }
        if self.client.max_reconnect_attempts == 0 {
            return Err(DispatcherError::config(
                "client.max_reconnect_attempts must be greater than 0",
            ));
        }

        Ok(())
    }
}
