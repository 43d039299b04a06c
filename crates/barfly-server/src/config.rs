//! Server configuration loading from file and environment variables.

use barfly_live::LiveConfig;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Live view tuning.
    #[serde(default)]
    pub live: LiveConfig,

    /// Session lifetime settings.
    #[serde(default)]
    pub sessions: SessionsConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// Change-feed events buffered per collection before slow readers lag.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "barfly_live=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Session expiry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Sessions older than this are deleted. 0 disables expiry.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "barfly.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_feed_capacity() -> usize {
    1_024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_session_ttl_secs() -> u64 {
    4 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            feed_capacity: default_feed_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `BARFLY_HOST` overrides `server.host`
/// - `BARFLY_PORT` overrides `server.port`
/// - `BARFLY_DB_PATH` overrides `database.path`
/// - `BARFLY_LOG_LEVEL` overrides `logging.level`
/// - `BARFLY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `BARFLY_INIT_TIMEOUT_MS` overrides `live.init_timeout_ms`
/// - `BARFLY_SESSION_TTL_SECS` overrides `sessions.ttl_secs`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("BARFLY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("BARFLY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("BARFLY_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("BARFLY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("BARFLY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(timeout) = std::env::var("BARFLY_INIT_TIMEOUT_MS") {
        if let Ok(parsed) = timeout.parse() {
            config.live.init_timeout_ms = parsed;
        }
    }
    if let Ok(ttl) = std::env::var("BARFLY_SESSION_TTL_SECS") {
        if let Ok(parsed) = ttl.parse() {
            config.sessions.ttl_secs = parsed;
        }
    }

    Ok(config)
}
