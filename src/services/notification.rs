//! notification.rs
//!
//! Доставка квитанций после покупки.
//!
//! Ключевые компоненты:
//! 1.  **CircuitBreaker**: "автоматический выключатель" перед внешним сервисом
//!     уведомлений, чтобы не долбить упавший сервис запросами.
//! 2.  **WebhookNotifier**: отправляет JSON квитанции на настроенный URL,
//!     подписывая тело токеном SHA-256.
//! 3.  **LogNotifier**: используется, когда webhook не настроен.
//!
//! Ошибка доставки никогда не откатывает бронирование: [`spawn_receipt`]
//! только логирует её.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::receipt::Receipt;

pub const SIGNATURE_HEADER: &str = "X-Receipt-Signature";

/// Состояния "автоматического выключателя".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Нормальный режим: запросы разрешены.
    Closed,
    /// Запросы блокируются до истечения таймаута.
    Open,
    /// Таймаут истёк, пропускаем пробный запрос.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    failure_threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(BreakerState { state: CircuitState::Closed, failures: 0, opened_at: None }),
            failure_threshold: failure_threshold.max(1),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Состояние выключателя остаётся согласованным даже после паники в другом потоке
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Можно ли выполнить следующий запрос.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map_or(Duration::MAX, |at| at.elapsed());
                if elapsed >= self.timeout {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures += 1;
        match inner.state {
            CircuitState::Closed if inner.failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    inner.failures, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("circuit breaker is open - notification service temporarily unavailable")]
    CircuitOpen,
    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notification service answered {0}")]
    Rejected(reqwest::StatusCode),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_receipt(&self, receipt: &Receipt) -> Result<(), NotifyError>;
}

/// Only writes the receipt to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_receipt(&self, receipt: &Receipt) -> Result<(), NotifyError> {
        info!(
            "📧 Receipt for {} {}: user {}, showing {}, seats [{}], total {}",
            receipt.kind,
            receipt.reference,
            receipt.user_id,
            receipt.showing_id,
            receipt.seats.join(", "),
            receipt.total
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    #[serde(flatten)]
    receipt: &'a Receipt,
    token: String,
}

#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    secret: String,
    http_client: reqwest::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            url: url.into(),
            secret: secret.into(),
            http_client: reqwest::Client::builder().timeout(timeout).build()?,
            circuit_breaker,
        })
    }

    /// Токен подписи: SHA-256 от ссылки, суммы, мест и секрета.
    pub fn sign(&self, receipt: &Receipt) -> String {
        let token_string = format!(
            "{}{}{}{}",
            receipt.reference,
            receipt.total,
            receipt.seats.join(","),
            self.secret
        );
        let mut hasher = Sha256::new();
        hasher.update(token_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_receipt(&self, receipt: &Receipt) -> Result<(), NotifyError> {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - skipping receipt for {}", receipt.reference);
            return Err(NotifyError::CircuitOpen);
        }

        let token = self.sign(receipt);
        let result = self
            .http_client
            .post(&self.url)
            .header(SIGNATURE_HEADER, &token)
            .json(&WebhookBody { receipt, token: token.clone() })
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.circuit_breaker.record_success();
                info!("Receipt for {} {} delivered", receipt.kind, receipt.reference);
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                // 4xx означает проблему с нашим запросом, а не недоступность сервиса
                if status.is_server_error() {
                    self.circuit_breaker.record_failure();
                }
                Err(NotifyError::Rejected(status))
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                Err(NotifyError::Transport(e))
            }
        }
    }
}

/// Sends the receipt in the background. The caller never waits for, nor
/// fails because of, the delivery.
pub fn spawn_receipt(notifier: Arc<dyn Notifier>, receipt: Receipt) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.send_receipt(&receipt).await {
            warn!("Failed to deliver receipt for {} {}: {}", receipt.kind, receipt.reference, e);
        }
    })
}
