//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use vigil_notify::SlackConfig;

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

    /// Live stream settings.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Slack notification settings.
    #[serde(default)]
    pub slack: SlackConfig,
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
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "vigil_notify=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Live stream configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Seconds of inactivity before a keepalive ping is sent.
    #[serde(default = "default_keepalive_seconds")]
    pub keepalive_seconds: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    "vigil.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_keepalive_seconds() -> u64 {
    30
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

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_seconds: default_keepalive_seconds(),
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
/// - `VIGIL_HOST` overrides `server.host`
/// - `VIGIL_PORT` overrides `server.port`
/// - `VIGIL_DB_PATH` overrides `database.path`
/// - `VIGIL_LOG_LEVEL` overrides `logging.level`
/// - `VIGIL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `VIGIL_SLACK_ENABLED` overrides `slack.enabled`
/// - `VIGIL_SLACK_BOT_TOKEN` overrides `slack.bot_token`
/// - `VIGIL_SLACK_CHANNEL_ID` overrides `slack.channel_id`
/// - `VIGIL_SLACK_INTERVAL_SECONDS` overrides `slack.interval_seconds`
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

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn is_truthy(value: &str) -> bool {
    value == "true" || value == "1"
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("VIGIL_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("VIGIL_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("VIGIL_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("VIGIL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("VIGIL_LOG_JSON") {
        config.logging.json = is_truthy(&json);
    }
    if let Some(enabled) = var("VIGIL_SLACK_ENABLED") {
        config.slack.enabled = is_truthy(&enabled);
    }
    if let Some(token) = var("VIGIL_SLACK_BOT_TOKEN") {
        config.slack.bot_token = token;
    }
    if let Some(channel) = var("VIGIL_SLACK_CHANNEL_ID") {
        config.slack.channel_id = channel;
    }
    if let Some(interval) = var("VIGIL_SLACK_INTERVAL_SECONDS") {
        if let Ok(parsed) = interval.parse() {
            config.slack.interval_seconds = parsed;
        }
    }
}
