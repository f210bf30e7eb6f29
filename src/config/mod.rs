use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::ServiceSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub inventory: InventoryConfig,
    pub reconciliation: ReconciliationConfig,
    pub notification: NotificationConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    /// `json` switches the log output to JSON lines.
    pub log_format: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    /// Migrations run only when this is set; nothing is created implicitly.
    pub auto_migrate: bool,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub seat_map_ttl_seconds: u64,
}

// Настройки холдов мест
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    pub hold_ttl_seconds: u64,
}

// Настройки фоновой сверки занятых мест
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub grace_seconds: u64,
}

// Настройки отправки квитанций
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub secret: String,
    pub timeout_seconds: u64,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn or_default(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = or_default(name, default);
    value.parse().map_err(|_| ConfigError::Invalid { name, value })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            app: AppConfig {
                host: or_default("HOST", "0.0.0.0"),
                port: parsed("PORT", "8000")?,
                environment: or_default("ENVIRONMENT", "development"),
                rust_log: or_default("RUST_LOG", "cinema_booking=debug,tower_http=debug"),
                log_format: or_default("LOG_FORMAT", "pretty"),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed("DB_POOL_SIZE", "20")?,
                auto_migrate: parsed("DB_AUTO_MIGRATE", "false")?,
            },
            redis: RedisConfig {
                url: required("REDIS_URL")?,
                seat_map_ttl_seconds: parsed("SEAT_MAP_CACHE_TTL_SECONDS", "30")?,
            },
            inventory: InventoryConfig {
                hold_ttl_seconds: parsed("SEAT_HOLD_TTL_SECONDS", "420")?,
            },
            reconciliation: ReconciliationConfig {
                enabled: parsed("RECONCILIATION_ENABLED", "true")?,
                interval_seconds: parsed("RECONCILIATION_INTERVAL_SECONDS", "60")?,
                grace_seconds: parsed("RECONCILIATION_GRACE_SECONDS", "300")?,
            },
            notification: NotificationConfig {
                webhook_url: env::var("RECEIPT_WEBHOOK_URL").ok().filter(|url| !url.is_empty()),
                secret: or_default("RECEIPT_WEBHOOK_SECRET", ""),
                timeout_seconds: parsed("RECEIPT_WEBHOOK_TIMEOUT_SECONDS", "10")?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5")?,
                timeout_seconds: parsed("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60")?,
            },
        })
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            hold_ttl: Duration::from_secs(self.inventory.hold_ttl_seconds),
            reconciliation_grace: Duration::from_secs(self.reconciliation.grace_seconds),
        }
    }

    pub fn is_json_logging(&self) -> bool {
        self.app.log_format.eq_ignore_ascii_case("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_numbers_are_reported_not_panicked() {
        // имя переменной уникально для теста, чтобы не мешать параллельным тестам
        std::env::set_var("CINEMA_TEST_BAD_NUMBER", "seven");
        let err = parsed::<u64>("CINEMA_TEST_BAD_NUMBER", "1").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "CINEMA_TEST_BAD_NUMBER", .. }));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let ttl: u64 = parsed("CINEMA_TEST_UNSET_TTL", "420").unwrap();
        assert_eq!(ttl, 420);
    }
}
