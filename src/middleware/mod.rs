use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::BookingError;
use crate::models::{Requester, User, UserId};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: String,
    pub is_admin: bool,
}

impl AuthUser {
    pub fn requester(&self) -> Requester {
        Requester { user_id: self.user_id, is_admin: self.is_admin }
    }

    pub fn require_admin(&self, action: &str) -> Result<(), BookingError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(BookingError::NotAuthorized(action.to_string()))
        }
    }
}

/// Splits a `Basic` authorization header into email and password.
pub fn parse_basic(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (email, password) = credentials.split_once(':')?;
    if email.is_empty() {
        return None;
    }
    Some((email.to_string(), password.to_string()))
}

// Basic Auth extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let (email, password) = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_basic)
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let user = User::find_active_by_email(&email, &state.db)
            .await
            .map_err(|e| {
                error!("Failed to load user {}: {}", email, e);
                StatusCode::SERVICE_UNAVAILABLE
            })?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // bcrypt тяжёлый, не блокируем рантайм
        let user = tokio::task::spawn_blocking(move || user.verify_password(&password).then_some(user))
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or_else(|| {
                warn!("Wrong password for {}", email);
                StatusCode::UNAUTHORIZED
            })?;

        // Обновляем last_logged_in
        sqlx::query("UPDATE users SET last_logged_in = NOW() WHERE user_id = $1")
            .bind(user.user_id)
            .execute(&state.db.pool)
            .await
            .ok(); // Игнорируем ошибку обновления

        Ok(AuthUser {
            user_id: user.user_id,
            email: user.email,
            is_admin: user.is_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_credentials() {
        let header = format!("Basic {}", general_purpose::STANDARD.encode("ann@example.com:pa:ss"));
        assert_eq!(
            parse_basic(&header),
            Some(("ann@example.com".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(parse_basic("Bearer abc"), None);
        assert_eq!(parse_basic("Basic !!!"), None);
    }
}
