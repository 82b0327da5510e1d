use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

use crate::errors::ServiceError;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_INVOICE_DIR: &str = "invoices";
const DEFAULT_SEQUENCE_RETRY_BUDGET: u32 = 5;

/// Application configuration with validation.
///
/// Layered the usual way: `config/default.toml`, then
/// `config/{environment}.toml`, then `APP_*` environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_env")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Sub-ledger prefix applied to invoice numbers (e.g. "SNF" for the
    /// secondary order channel). Unset means the plain invoice scope.
    #[serde(default)]
    pub invoice_prefix: Option<String>,

    /// Directory rendered invoice documents are written to
    #[serde(default = "default_invoice_dir")]
    pub invoice_output_dir: String,

    /// Attempts before a sequence allocation surfaces a conflict error
    #[serde(default = "default_sequence_retry_budget")]
    #[validate(range(min = 1, max = 10))]
    pub sequence_retry_budget: u32,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_invoice_dir() -> String {
    DEFAULT_INVOICE_DIR.to_string()
}

fn default_sequence_retry_budget() -> u32 {
    DEFAULT_SEQUENCE_RETRY_BUDGET
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: default_host(),
            port: default_port(),
            environment: environment.into(),
            log_level: default_log_level(),
            auto_migrate: true,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            invoice_prefix: None,
            invoice_output_dir: default_invoice_dir(),
            sequence_retry_budget: default_sequence_retry_budget(),
        }
    }

    /// Loads configuration from layered files and environment variables.
    pub fn load() -> Result<Self, ServiceError> {
        let environment = env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let mut builder = Config::builder();

        let default_path = Path::new(CONFIG_DIR).join("default.toml");
        if default_path.exists() {
            builder = builder.add_source(File::from(default_path));
        }

        let env_path = Path::new(CONFIG_DIR).join(format!("{environment}.toml"));
        if env_path.exists() {
            builder = builder.add_source(File::from(env_path));
        }

        let settings = builder
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()
            .map_err(|e| ServiceError::ConfigError(e.to_string()))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| ServiceError::ConfigError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ServiceError::ConfigError(e.to_string()))?;

        info!(
            environment = %config.environment,
            host = %config.host,
            port = config.port,
            "configuration loaded"
        );

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_fills_defaults() {
        let cfg = AppConfig::new("sqlite::memory:", "test");
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.sequence_retry_budget, DEFAULT_SEQUENCE_RETRY_BUDGET);
        assert!(cfg.invoice_prefix.is_none());
        assert!(!cfg.is_production());
    }
}
