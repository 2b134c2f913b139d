//! Server configuration loading from file and environment variables.

use bracket_db::{
    DataLocation, DbRuntimeSettings, DeploymentMode, PgDsn, StorageSettings, STANDALONE_ENV,
};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::readiness::ProbeSettings;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Storage backend, taken from `BRACKET_STANDALONE` only; never read
    /// from the file.
    #[serde(skip)]
    pub mode: DeploymentMode,

    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Readiness probe settings.
    #[serde(default)]
    pub probe: ProbeConfig,
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
    /// Directory holding the embedded data file. Defaults to the directory
    /// of the executable, or the workspace root under cargo.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Postgres DSN, required in server mode.
    #[serde(default)]
    pub pg_dsn: Option<String>,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum connections per pool.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "bracket_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Readiness probe timing.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Give up after this many milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between attempts, in milliseconds.
    #[serde(default = "default_probe_interval_ms")]
    pub interval_ms: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8400
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    30_000
}

fn default_probe_interval_ms() -> u64 {
    1_000
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
            data_dir: None,
            pg_dsn: None,
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

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout_ms(),
            interval_ms: default_probe_interval_ms(),
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

    /// Server mode is selected but `database.pg_dsn` is unset.
    #[error("database.pg_dsn is required unless BRACKET_STANDALONE=true")]
    MissingDsn,

    /// `database.pg_dsn` is not a usable Postgres DSN.
    #[error("invalid database.pg_dsn: {0}")]
    InvalidDsn(String),
}

impl Config {
    /// Socket address the server binds to and the probe targets.
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    pub fn deployment_mode(&self) -> DeploymentMode {
        self.mode
    }

    /// Translates the database section into storage bootstrap settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingDsn` or `ConfigError::InvalidDsn` when
    /// server mode is selected without a valid DSN.
    pub fn storage_settings(&self) -> Result<StorageSettings, ConfigError> {
        let mode = self.deployment_mode();
        let pg_dsn = match (mode, self.database.pg_dsn.as_deref()) {
            (DeploymentMode::Server, None) => return Err(ConfigError::MissingDsn),
            (_, Some(raw)) => match PgDsn::parse(raw) {
                Ok(dsn) => Some(dsn),
                Err(e) if mode == DeploymentMode::Server => {
                    return Err(ConfigError::InvalidDsn(e.to_string()))
                }
                Err(_) => None,
            },
            (DeploymentMode::Embedded, None) => None,
        };
        let location = match &self.database.data_dir {
            Some(dir) => DataLocation::Explicit(dir.clone()),
            None => DataLocation::detect(),
        };

        Ok(StorageSettings {
            mode,
            location,
            pg_dsn,
            runtime: DbRuntimeSettings {
                busy_timeout_ms: self.database.busy_timeout_ms,
                pool_max_size: self.database.pool_max_size,
            },
        })
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            timeout: Duration::from_millis(self.probe.timeout_ms),
            interval: Duration::from_millis(self.probe.interval_ms),
            ..ProbeSettings::default()
        }
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// The deployment mode comes from `BRACKET_STANDALONE` alone: "true" (any
/// case) selects embedded storage, anything else or unset selects server.
///
/// Environment variable overrides:
/// - `BRACKET_HOST` overrides `server.host`
/// - `BRACKET_PORT` overrides `server.port`
/// - `BRACKET_DATA_DIR` overrides `database.data_dir`
/// - `BRACKET_PG_DSN` overrides `database.pg_dsn`
/// - `BRACKET_LOG_LEVEL` overrides `logging.level`
/// - `BRACKET_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// The storage settings are validated before returning, so a server-mode
/// config without a usable DSN fails here.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the database section is invalid.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`], reading overrides through `env`.
pub fn load_config_with<F>(path: Option<&str>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let config = read_config_with(path, env)?;
    config.storage_settings()?;
    Ok(config)
}

/// Reads the file and applies environment overrides without validating the
/// database section. Enough for tools that only need the server address.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn read_config(path: Option<&str>) -> Result<Config, ConfigError> {
    read_config_with(path, |key| std::env::var(key).ok())
}

/// Same as [`read_config`], reading overrides through `env`.
pub fn read_config_with<F>(path: Option<&str>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
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

    apply_env_overrides(&mut config, env);

    Ok(config)
}

fn apply_env_overrides<F>(config: &mut Config, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = env("BRACKET_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = env("BRACKET_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    config.mode = DeploymentMode::from_flag(env(STANDALONE_ENV).as_deref());
    if let Some(dir) = env("BRACKET_DATA_DIR") {
        config.database.data_dir = Some(PathBuf::from(dir));
    }
    if let Some(dsn) = env("BRACKET_PG_DSN") {
        config.database.pg_dsn = Some(dsn);
    }
    if let Some(level) = env("BRACKET_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("BRACKET_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
