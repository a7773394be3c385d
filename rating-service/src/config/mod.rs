//! Configuration module for rating-service.

use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RatingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub usage_aggregation: CollaboratorConfig,
    pub invoicing_service: CollaboratorConfig,
    pub notification_service: CollaboratorConfig,
    pub worker: WorkerConfig,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub queue_size: usize,
    pub poll_interval_secs: u64,
    /// Lifetime usages (and subscriptions) picked up per poll.
    pub batch_size: i64,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_size: 1000,
            poll_interval_secs: 30,
            batch_size: 100,
        }
    }
}

/// Bounded retry of lifetime usage units of work.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetrySettings {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..Default::default()
        }
    }
}

impl RatingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = common.is_production();

        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "rating-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            usage_aggregation: CollaboratorConfig {
                url: get_env(
                    "USAGE_AGGREGATION_URL",
                    Some("http://usage-service:3000"),
                    is_prod,
                )?,
            },
            invoicing_service: CollaboratorConfig {
                url: get_env(
                    "INVOICING_SERVICE_URL",
                    Some("http://invoicing-service:3000"),
                    is_prod,
                )?,
            },
            notification_service: CollaboratorConfig {
                url: get_env(
                    "NOTIFICATION_SERVICE_URL",
                    Some("http://notification-service:3000"),
                    is_prod,
                )?,
            },
            worker: WorkerConfig {
                enabled: parse_env("WORKER_ENABLED", true)?,
                queue_size: parse_env("WORKER_QUEUE_SIZE", 1000)?,
                poll_interval_secs: parse_env("WORKER_POLL_INTERVAL_SECS", 30)?,
                batch_size: parse_env("WORKER_BATCH_SIZE", 100)?,
            },
            retry: RetrySettings {
                max_attempts: parse_env("RETRY_MAX_ATTEMPTS", 5)?,
                initial_backoff_ms: parse_env("RETRY_INITIAL_BACKOFF_MS", 100)?,
                max_backoff_ms: parse_env("RETRY_MAX_BACKOFF_MS", 10_000)?,
            },
            common,
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

/// Optional typed variable; a present but malformed value is an error.
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, val))
        }),
        Err(_) => Ok(default),
    }
}
