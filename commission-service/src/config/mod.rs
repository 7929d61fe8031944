//! Configuration module for commission-service.

use crate::models::ScheduleNamespace;
use crate::services::{EngineSettings, EventSettings, GenerationSettings, SweepSettings};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CommissionConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub sweep: SweepConfig,
    pub events: EventsConfig,
    pub generation: GenerationConfig,
    pub schedule_sources: Vec<ScheduleNamespace>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: i64,
}

#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub queue_size: usize,
    pub retry_max_elapsed_secs: u64,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub require_client_payment_verification: bool,
    pub use_rule_engine: bool,
}

impl CommissionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "commission-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2),
            },
            sweep: SweepConfig {
                enabled: parse_bool_env("VERIFICATION_SWEEP_ENABLED", true)?,
                interval_secs: parse_env("VERIFICATION_SWEEP_INTERVAL_SECS", 3600),
                batch_size: parse_env("VERIFICATION_SWEEP_BATCH_SIZE", 100),
            },
            events: EventsConfig {
                queue_size: parse_env("PAYMENT_EVENT_QUEUE_SIZE", 1024),
                retry_max_elapsed_secs: parse_env("PAYMENT_EVENT_RETRY_MAX_ELAPSED_SECS", 60),
            },
            generation: GenerationConfig {
                require_client_payment_verification: parse_bool_env(
                    "COMMISSION_REQUIRE_CLIENT_PAYMENT_VERIFICATION",
                    true,
                )?,
                use_rule_engine: parse_bool_env("COMMISSION_USE_RULE_ENGINE", true)?,
            },
            schedule_sources: match env::var("PAYMENT_SCHEDULE_SOURCES") {
                Ok(value) => parse_schedule_sources(&value)?,
                Err(_) => vec![ScheduleNamespace::Collections, ScheduleNamespace::Sales],
            },
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            generation: GenerationSettings {
                requires_client_payment_verification: self
                    .generation
                    .require_client_payment_verification,
            },
            use_rule_engine: self.generation.use_rule_engine,
            schedule_order: self.schedule_sources.clone(),
            sweep: SweepSettings {
                enabled: self.sweep.enabled,
                interval: Duration::from_secs(self.sweep.interval_secs.max(1)),
                batch_size: self.sweep.batch_size.max(1),
            },
        }
    }

    pub fn event_settings(&self) -> EventSettings {
        EventSettings {
            queue_size: self.events.queue_size.max(1),
            retry_max_elapsed: Duration::from_secs(self.events.retry_max_elapsed_secs),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_bool_env(key: &str, default: bool) -> Result<bool, AppError> {
    match env::var(key) {
        Ok(value) => parse_bool(&value).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("{} must be true or false, got '{}'", key, value))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Comma-separated namespace list, e.g. "sales,collections".
pub fn parse_schedule_sources(value: &str) -> Result<Vec<ScheduleNamespace>, AppError> {
    let mut order = Vec::new();
    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let namespace = ScheduleNamespace::parse(name).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("Unknown payment schedule source '{}'", name))
        })?;
        if !order.contains(&namespace) {
            order.push(namespace);
        }
    }
    if order.is_empty() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "PAYMENT_SCHEDULE_SOURCES must name at least one source"
        )));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schedule_sources() {
        assert_eq!(
            parse_schedule_sources("sales, collections").unwrap(),
            vec![ScheduleNamespace::Sales, ScheduleNamespace::Collections]
        );
        assert_eq!(
            parse_schedule_sources("collections,collections").unwrap(),
            vec![ScheduleNamespace::Collections]
        );
        assert!(parse_schedule_sources("billing").is_err());
        assert!(parse_schedule_sources(" , ").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
