//! Layered configuration
//!
//! Sources, lowest priority first: `conf/application.yml` (or `--config`),
//! `PGLOCK_*` environment variables, command line flags.
//!
//! Environment variables name a key with `__` between path segments, so
//! `PGLOCK_DB__POOL__MAX_OPEN` sets `db.pool.max_open`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use pglock_core::DEFAULT_RETRY_INTERVAL;
use pglock_persistence::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_LOCK_TABLE_NAME, DEFAULT_MAX_IDLE_CONNECTIONS,
    DEFAULT_MAX_OPEN_CONNECTIONS, LockClientOptions,
};

use crate::cli::Cli;
use crate::logging::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";

pub const DB_URL: &str = "db.url";
pub const DB_POOL_MAX_OPEN: &str = "db.pool.max_open";
pub const DB_POOL_MAX_IDLE: &str = "db.pool.max_idle";
pub const DB_POOL_CONNECT_TIMEOUT: &str = "db.pool.connect_timeout";
pub const DB_POOL_SQLX_LOGGING: &str = "db.pool.sqlx_logging";
pub const LOCK_TABLE: &str = "lock.table";
pub const LOCK_RETRY_INTERVAL_MS: &str = "lock.retry_interval_ms";
pub const LOGS_PATH: &str = "logs.path";
pub const LOGS_CONSOLE: &str = "logs.console";
pub const LOGS_FILE: &str = "logs.file";
pub const LOGS_LEVEL: &str = "logs.level";

#[derive(Clone, Debug)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Build the configuration for a parsed command line
    pub fn from_cli(args: &Cli) -> Result<Self, config::ConfigError> {
        Self::from_sources(args, environment())
    }

    fn from_sources(args: &Cli, environment: Environment) -> Result<Self, config::ConfigError> {
        let file = match &args.config {
            Some(path) => File::from(path.as_path()).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let mut config_builder = Config::builder().add_source(file).add_source(environment);

        if let Some(v) = &args.database_url {
            config_builder = config_builder.set_override(DB_URL, v.as_str())?;
        }
        if let Some(v) = &args.table {
            config_builder = config_builder.set_override(LOCK_TABLE, v.as_str())?;
        }

        Ok(Configuration {
            config: config_builder.build()?,
        })
    }

    fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    }

    // ========================================================================
    // Database Configuration
    // ========================================================================

    pub fn database_url(&self) -> Option<String> {
        self.config
            .get_string(DB_URL)
            .ok()
            .filter(|url| !url.is_empty())
    }

    pub fn max_open_connections(&self) -> u32 {
        self.get_u32(DB_POOL_MAX_OPEN, DEFAULT_MAX_OPEN_CONNECTIONS)
    }

    pub fn max_idle_connections(&self) -> u32 {
        self.get_u32(DB_POOL_MAX_IDLE, DEFAULT_MAX_IDLE_CONNECTIONS)
    }

    /// Connect timeout in seconds
    pub fn connect_timeout(&self) -> Duration {
        self.config
            .get_int(DB_POOL_CONNECT_TIMEOUT)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn sqlx_logging(&self) -> bool {
        self.config.get_bool(DB_POOL_SQLX_LOGGING).unwrap_or(false)
    }

    // ========================================================================
    // Lock Configuration
    // ========================================================================

    pub fn lock_table(&self) -> String {
        self.config
            .get_string(LOCK_TABLE)
            .unwrap_or(DEFAULT_LOCK_TABLE_NAME.to_string())
    }

    pub fn retry_interval(&self) -> Duration {
        self.config
            .get_int(LOCK_RETRY_INTERVAL_MS)
            .ok()
            .and_then(|ms| u64::try_from(ms).ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_INTERVAL)
    }

    /// Options for the PostgreSQL store; `None` when no URL is configured
    pub fn lock_client_options(&self) -> Option<LockClientOptions> {
        let database_url = self.database_url()?;
        Some(LockClientOptions {
            database_url,
            max_open_connections: self.max_open_connections(),
            max_idle_connections: self.max_idle_connections(),
            lock_table_name: self.lock_table(),
            connect_timeout: self.connect_timeout(),
            sqlx_logging: self.sqlx_logging(),
        })
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    /// Logging settings; keys absent from the configuration fall back to the
    /// `PGLOCK_LOG_*` environment defaults
    pub fn logging_config(&self) -> LoggingConfig {
        let defaults = LoggingConfig::from_env();
        LoggingConfig::from_config(
            self.config
                .get_string(LOGS_PATH)
                .ok()
                .or_else(|| Some(defaults.log_dir.display().to_string())),
            self.config
                .get_bool(LOGS_CONSOLE)
                .unwrap_or(defaults.console_output),
            self.config.get_bool(LOGS_FILE).unwrap_or(defaults.file_logging),
            self.config
                .get_string(LOGS_LEVEL)
                .unwrap_or(defaults.console_level.to_string()),
        )
    }
}

/// `PGLOCK_*` variables, `__` separating key segments
fn environment() -> Environment {
    Environment::with_prefix("pglock")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
