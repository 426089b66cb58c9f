use std::net::SocketAddr;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::db::models::DEFAULT_ARCHIVE_RETENTION_DAYS;
use crate::error::AppError;
use crate::lifecycle::sweeper::SweepSettings;

/// Name of the optional configuration file, looked up in the working directory.
pub const CONFIG_FILE: &str = "docshelf";

/// Prefix of the environment variables overriding the file, e.g.
/// `DOCSHELF_SWEEP_INTERVAL_SECS=600`.
pub const ENV_PREFIX: &str = "DOCSHELF";

/// Which persistence and content store pair to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local maps. Nothing survives a restart.
    Memory,
    /// MongoDB for records, S3 for payloads.
    Mongo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Base of the links handed out by the sharing service.
    pub public_base_url: String,
    pub backend: Backend,
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    pub sweep_interval_secs: u64,
    pub archive_retention_days: i64,
}

impl AppConfig {
    /// Defaults, then `docshelf.toml` if present, then `DOCSHELF_*` variables.
    pub fn load() -> Result<Self, AppError> {
        let config = defaults()
            .and_then(|builder| {
                builder
                    .add_source(File::with_name(CONFIG_FILE).required(false))
                    .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
                    .build()
            })
            .map_err(|e| AppError::Internal(format!("Invalid configuration: {e}")))?;

        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, AppError> {
        let app: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::Internal(format!("Invalid configuration: {e}")))?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.sweep_interval_secs == 0 {
            return Err(AppError::Internal(
                "sweep_interval_secs must be greater than zero".into(),
            ));
        }
        if self.archive_retention_days <= 0 {
            return Err(AppError::Internal(
                "archive_retention_days must be greater than zero".into(),
            ));
        }
        self.bind_addr()?;
        self.public_base_url()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        self.bind_addr
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid bind_addr '{}': {e}", self.bind_addr)))
    }

    pub fn public_base_url(&self) -> Result<Url, AppError> {
        Url::parse(&self.public_base_url).map_err(|e| {
            AppError::Internal(format!(
                "Invalid public_base_url '{}': {e}",
                self.public_base_url
            ))
        })
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            interval: Duration::from_secs(self.sweep_interval_secs),
            retention: chrono::Duration::days(self.archive_retention_days),
        }
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("bind_addr", "0.0.0.0:8080")?
        .set_default("public_base_url", "http://localhost:8080")?
        .set_default("backend", "memory")?
        .set_default("mongodb_uri", "mongodb://localhost:27017")?
        .set_default("mongodb_database", "docshelf")?
        .set_default("s3_bucket", "docshelf-documents")?
        .set_default("sweep_interval_secs", 3600)?
        .set_default("archive_retention_days", DEFAULT_ARCHIVE_RETENTION_DAYS)
}
