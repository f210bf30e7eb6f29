use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BookingResult;
use crate::middleware::AuthUser;
use crate::models::{Booking, BookingStatus, PaymentStatus};
use crate::services::NewBooking;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(get_user_bookings))
        .route("/bookings/all", get(get_all_bookings))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/complete", post(complete_booking))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/bookings/{id}/status", put(update_booking_status))
        .route("/bookings/{id}/payment", put(update_payment_status))
}

// POST /api/bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<NewBooking>,
) -> BookingResult<(StatusCode, Json<Booking>)> {
    let showing_id = req.showing_id;
    let booking = state.services.bookings.create_booking(user.requester(), req).await?;
    state.cache.invalidate_seats(showing_id).await;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings
async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> BookingResult<Json<Vec<Booking>>> {
    Ok(Json(state.services.bookings.list_user_bookings(user.requester()).await?))
}

// GET /api/bookings/all
async fn get_all_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> BookingResult<Json<Vec<Booking>>> {
    Ok(Json(state.services.bookings.list_all_bookings(user.requester()).await?))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> BookingResult<Json<Booking>> {
    Ok(Json(state.services.bookings.get_booking(id, user.requester()).await?))
}

// POST /api/bookings/{id}/complete
async fn complete_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> BookingResult<Json<Booking>> {
    Ok(Json(state.services.bookings.complete_booking(id, user.requester()).await?))
}

// POST /api/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> BookingResult<Json<Booking>> {
    let booking = state.services.bookings.cancel_booking(id, user.requester()).await?;
    state.cache.invalidate_seats(booking.showing_id).await;
    Ok(Json(booking))
}

#[derive(Debug, Deserialize)]
struct UpdateBookingStatusRequest {
    status: BookingStatus,
}

// PUT /api/bookings/{id}/status
async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateBookingStatusRequest>,
) -> BookingResult<Json<Booking>> {
    let booking = state
        .services
        .bookings
        .update_booking_status(id, req.status, user.requester())
        .await?;
    state.cache.invalidate_seats(booking.showing_id).await;
    Ok(Json(booking))
}

#[derive(Debug, Deserialize)]
struct UpdatePaymentStatusRequest {
    payment_status: PaymentStatus,
}

// PUT /api/bookings/{id}/payment
async fn update_payment_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePaymentStatusRequest>,
) -> BookingResult<Json<Booking>> {
    let booking = state
        .services
        .bookings
        .update_payment_status(id, req.payment_status, user.requester())
        .await?;
    state.cache.invalidate_seats(booking.showing_id).await;
    Ok(Json(booking))
}
