pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod inventory;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::inventory::SystemClock;
use crate::services::{
    notification::{CircuitBreaker, LogNotifier, Notifier, WebhookNotifier},
    QrPayloadRenderer, Services,
};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub config: config::Config,
    pub services: Services,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::connect(&config.database).await?;
        if config.database.auto_migrate {
            db.run_migrations().await?;
        } else {
            info!("DB_AUTO_MIGRATE is off, skipping migrations");
        }

        let redis = redis_client::RedisClient::connect(&config.redis.url).await?;
        let cache = cache::CacheService::new(redis.clone(), config.redis.seat_map_ttl_seconds);

        let services = Services::new(
            Arc::new(db.store()),
            Arc::new(SystemClock),
            config.service_settings(),
            notifier(&config)?,
            Arc::new(QrPayloadRenderer),
        );

        Ok(Arc::new(Self { db, redis, cache, config, services }))
    }
}

fn notifier(config: &config::Config) -> anyhow::Result<Arc<dyn Notifier>> {
    let Some(url) = &config.notification.webhook_url else {
        info!("RECEIPT_WEBHOOK_URL not set, receipts go to the log");
        return Ok(Arc::new(LogNotifier));
    };

    let breaker = Arc::new(CircuitBreaker::new(
        config.circuit_breaker.failure_threshold,
        config.circuit_breaker.timeout_seconds,
    ));
    let webhook = WebhookNotifier::new(
        url.clone(),
        config.notification.secret.clone(),
        Duration::from_secs(config.notification.timeout_seconds),
        breaker,
    )?;
    info!("Receipts are delivered to {}", url);
    Ok(Arc::new(webhook))
}
