//! Configuration management module for wgwarden.
//!
//! This module provides functionality for loading, parsing, and managing
//! configuration settings for the wgwarden daemon.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Missing required configuration value
    #[error("Missing required configuration value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// WireGuard control-plane settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireguardConfig {
    /// Directory holding the interface `.conf` files (default: "/etc/wireguard")
    #[serde(default = "default_conf_path")]
    pub conf_path: String,

    /// Timeout for external `wg`/`wg-quick` invocations in seconds (default: 10)
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_conf_path() -> String {
    "/etc/wireguard".to_string()
}

fn default_command_timeout_secs() -> u64 {
    10
}

impl Default for WireguardConfig {
    fn default() -> Self {
        WireguardConfig {
            conf_path: default_conf_path(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl WireguardConfig {
    /// Returns the external command timeout as a [`Duration`].
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Peer store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// SQLite connection string (default: "sqlite:./db/wgwarden.db")
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_database_url() -> String {
    "sqlite:./db/wgwarden.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            database_url: default_database_url(),
        }
    }
}

/// Reconciliation engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Seconds between reconciliation passes (default: 10)
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_scan_interval_secs() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

impl EngineConfig {
    /// Returns the scan interval as a [`Duration`].
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// Defaults applied to peers discovered from an interface config.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeerDefaults {
    /// Global DNS servers pushed to new peers (default: "1.1.1.1")
    #[serde(default = "default_peer_dns")]
    pub dns: String,

    /// Endpoint allowed-IPs CIDR list for new peers (default: "0.0.0.0/0")
    #[serde(default = "default_endpoint_allowed_ip")]
    pub endpoint_allowed_ip: String,

    /// MTU for new peers (default: 1420)
    #[serde(default = "default_mtu")]
    pub mtu: u32,

    /// Persistent keepalive in seconds for new peers (default: 21)
    #[serde(default = "default_keepalive")]
    pub keepalive: u32,

    /// Remote endpoint written into generated peer configs
    #[serde(default)]
    pub remote_endpoint: String,
}

fn default_peer_dns() -> String {
    "1.1.1.1".to_string()
}

fn default_endpoint_allowed_ip() -> String {
    "0.0.0.0/0".to_string()
}

fn default_mtu() -> u32 {
    1420
}

fn default_keepalive() -> u32 {
    21
}

impl Default for PeerDefaults {
    fn default() -> Self {
        PeerDefaults {
            dns: default_peer_dns(),
            endpoint_allowed_ip: default_endpoint_allowed_ip(),
            mtu: default_mtu(),
            keepalive: default_keepalive(),
            remote_endpoint: String::new(),
        }
    }
}

/// Main configuration structure for wgwarden.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WardenConfig {
    /// WireGuard control-plane configuration
    #[serde(default)]
    pub wireguard: WireguardConfig,

    /// Peer store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Reconciliation engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Defaults for newly discovered peers
    #[serde(default)]
    pub peer_defaults: PeerDefaults,

    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WardenConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        WardenConfig::default()
    }

    /// Default config file location: the system path when it exists,
    /// otherwise the user's config directory.
    pub fn default_path() -> PathBuf {
        let system = PathBuf::from("/etc/wgwarden/config.toml");
        if system.exists() {
            return system;
        }
        dirs::config_dir()
            .map(|dir| dir.join("wgwarden/config.toml"))
            .unwrap_or(system)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: WardenConfig = toml::from_str(&content)?;

        // Environment variables take precedence over the file
        Self::apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wireguard.conf_path.trim().is_empty() {
            return Err(ConfigError::MissingValue("wireguard.conf_path".to_string()));
        }

        if self.wireguard.command_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "wireguard.command_timeout_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.engine.scan_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "engine.scan_interval_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.store.database_url.trim().is_empty() {
            return Err(ConfigError::MissingValue("store.database_url".to_string()));
        }

        if !(576..=9200).contains(&self.peer_defaults.mtu) {
            return Err(ConfigError::InvalidValue {
                key: "peer_defaults.mtu".to_string(),
                message: format!("{} is outside 576..=9200", self.peer_defaults.mtu),
            });
        }

        if self.peer_defaults.keepalive > 3600 {
            return Err(ConfigError::InvalidValue {
                key: "peer_defaults.keepalive".to_string(),
                message: format!("{} is outside 0..=3600", self.peer_defaults.keepalive),
            });
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: WGWARDEN_)
    ///
    /// Supported keys:
    /// - WGWARDEN_LOG_LEVEL
    /// - WGWARDEN_CONF_PATH, WGWARDEN_COMMAND_TIMEOUT_SECS
    /// - WGWARDEN_DATABASE_URL
    /// - WGWARDEN_SCAN_INTERVAL_SECS
    fn apply_env_overrides(cfg: &mut WardenConfig) {
        use std::env;

        if let Ok(v) = env::var("WGWARDEN_LOG_LEVEL") {
            cfg.log_level = v;
        }
        if let Ok(v) = env::var("WGWARDEN_CONF_PATH") {
            cfg.wireguard.conf_path = v;
        }
        if let Ok(v) = env::var("WGWARDEN_COMMAND_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                cfg.wireguard.command_timeout_secs = n;
            }
        }
        if let Ok(v) = env::var("WGWARDEN_DATABASE_URL") {
            cfg.store.database_url = v;
        }
        if let Ok(v) = env::var("WGWARDEN_SCAN_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                cfg.engine.scan_interval_secs = n;
            }
        }
    }
}
