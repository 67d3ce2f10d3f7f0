//! Service configuration.
//!
//! Everything comes from environment variables, loaded fail-fast: a
//! missing required value stops the process at startup rather than at the
//! first request. Secrets are never hardcoded or logged.

use std::env;
use std::time::Duration;

use proveniq_ledger::ValidatorConfig;
use proveniq_webhook::WorkerConfig;

/// Configuration failures at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable is present but unusable.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// sqlx database URL.
    pub database_url: String,
    /// Schema version stamped onto committed entries.
    pub active_schema_version: String,
    /// Schema versions accepted on ingest.
    pub allowed_schema_versions: Vec<String>,
    /// Key required on every authenticated route.
    pub admin_api_key: String,
    /// Deliveries claimed per worker pass.
    pub webhook_batch_size: u32,
    /// Attempt budget before dead-lettering.
    pub webhook_max_attempts: u32,
    /// First retry delay in seconds.
    pub webhook_backoff_base_secs: u64,
    /// Ceiling on any retry delay in seconds.
    pub webhook_backoff_cap_secs: u64,
    /// Log output format.
    pub log_format: LogFormat,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parsed_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
    }
}

impl ServiceConfig {
    /// Load from the environment.
    ///
    /// Required: `PROVENIQ_DATABASE_URL`, `PROVENIQ_SCHEMA_VERSION`,
    /// `PROVENIQ_ADMIN_API_KEY`. Everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("PROVENIQ_DATABASE_URL")?;
        let active_schema_version = required("PROVENIQ_SCHEMA_VERSION")?;
        let admin_api_key = required("PROVENIQ_ADMIN_API_KEY")?;

        let mut allowed_schema_versions: Vec<String> =
            match env::var("PROVENIQ_ALLOWED_SCHEMA_VERSIONS") {
                Ok(raw) => raw
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect(),
                Err(_) => Vec::new(),
            };
        if !allowed_schema_versions.contains(&active_schema_version) {
            allowed_schema_versions.push(active_schema_version.clone());
        }

        let log_format = match env::var("PROVENIQ_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("text") | Err(_) => LogFormat::Text,
            Ok(other) => {
                return Err(ConfigError::Invalid("PROVENIQ_LOG_FORMAT", other.to_string()))
            }
        };

        let config = Self {
            database_url,
            active_schema_version,
            allowed_schema_versions,
            admin_api_key,
            webhook_batch_size: parsed_or("PROVENIQ_WEBHOOK_BATCH_SIZE", 50)?,
            webhook_max_attempts: parsed_or("PROVENIQ_WEBHOOK_MAX_ATTEMPTS", 5)?,
            webhook_backoff_base_secs: parsed_or("PROVENIQ_WEBHOOK_BACKOFF_BASE_SECS", 60)?,
            webhook_backoff_cap_secs: parsed_or("PROVENIQ_WEBHOOK_BACKOFF_CAP_SECS", 86_400)?,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Consistency checks beyond per-field parsing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_api_key.len() < 16 {
            return Err(ConfigError::Invalid(
                "PROVENIQ_ADMIN_API_KEY",
                "key must be at least 16 characters".into(),
            ));
        }
        if self.webhook_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "PROVENIQ_WEBHOOK_BATCH_SIZE",
                "batch size must be positive".into(),
            ));
        }
        if self.webhook_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "PROVENIQ_WEBHOOK_MAX_ATTEMPTS",
                "attempt budget must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Validator config for the append path.
    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            active_schema_version: self.active_schema_version.clone(),
            allowed_schema_versions: self.allowed_schema_versions.clone(),
        }
    }

    /// Worker config for the delivery engine.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            batch_size: self.webhook_batch_size,
            max_attempts: self.webhook_max_attempts,
            backoff_base_secs: self.webhook_backoff_base_secs,
            backoff_cap_secs: self.webhook_backoff_cap_secs,
            tick_interval: Duration::from_secs(30),
        }
    }
}
