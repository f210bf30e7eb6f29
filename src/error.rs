use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::store::StorageError;

pub type BookingResult<T> = Result<T, BookingError>;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("seat {seat} is not available")]
    SeatUnavailable { seat: String },

    #[error("seats are no longer available: {}", .seats.join(", "))]
    SeatConflict { seats: Vec<String> },

    #[error("seat {seat} is not held by the caller")]
    NotHolder { seat: String },

    #[error("not authorized to act on {0}")]
    NotAuthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition { entity: &'static str, from: String, to: String },

    #[error("booking {booking} no longer occupies seats {}", .seats.join(", "))]
    SeatsLost { booking: Uuid, seats: Vec<String> },

    #[error("{0} is already scheduled")]
    DuplicateShowing(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl BookingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::SeatUnavailable { .. }
            | BookingError::SeatConflict { .. }
            | BookingError::SeatsLost { .. }
            | BookingError::InvalidTransition { .. }
            | BookingError::DuplicateShowing(_) => StatusCode::CONFLICT,
            BookingError::NotHolder { .. } | BookingError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            // Хранилище недоступно: клиент может повторить запрос
            BookingError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Storage failures are the only retryable class.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::Storage(_))
    }
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BookingError::Validation(errors.to_string())
    }
}

#[derive(Serialize)]
pub struct ApiError {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    seats: Option<Vec<String>>,
    retryable: bool,
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let BookingError::Storage(ref e) = self {
            tracing::error!("storage failure: {:?}", e);
        }
        let seats = match &self {
            BookingError::SeatConflict { seats } | BookingError::SeatsLost { seats, .. } => {
                Some(seats.clone())
            }
            BookingError::SeatUnavailable { seat } | BookingError::NotHolder { seat } => {
                Some(vec![seat.clone()])
            }
            _ => None,
        };
        let body = ApiError {
            success: false,
            // Детали ошибок хранилища наружу не отдаём
            message: match &self {
                BookingError::Storage(_) => "storage temporarily unavailable".to_string(),
                other => other.to_string(),
            },
            seats,
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_names_every_blocking_seat() {
        let err = BookingError::SeatConflict { seats: vec!["A2".into(), "B4".into()] };
        assert_eq!(err.to_string(), "seats are no longer available: A2, B4");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(!err.is_retryable());
    }

    #[test]
    fn maps_taxonomy_to_http_status() {
        assert_eq!(BookingError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(BookingError::NotHolder { seat: "A1".into() }.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(BookingError::NotFound("booking".into()).status_code(), StatusCode::NOT_FOUND);

        let lost = BookingError::SeatsLost { booking: Uuid::nil(), seats: vec!["A2".into()] };
        assert_eq!(lost.status_code(), StatusCode::CONFLICT);
        assert!(!lost.is_retryable());

        let storage = BookingError::from(StorageError::Corrupt("bad row".into()));
        assert_eq!(storage.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(storage.is_retryable());
    }
}
