use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::BookingResult;
use crate::inventory::InitializeOutcome;
use crate::middleware::AuthUser;
use crate::models::{
    HallTemplate, NewShowing, Seat, SeatStatusView, Showing, ShowingFilter, ShowingId,
};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/showings", post(create_showing).get(list_showings))
        .route("/showings/{id}", get(get_showing))
        .route("/showings/{id}/seats", get(list_seats))
        .route("/showings/{id}/seats/initialize", post(initialize_seats))
        .route("/showings/{id}/seats/{seat}", get(seat_status))
        .route("/showings/{id}/seats/{seat}/hold", post(hold_seat))
        .route("/showings/{id}/seats/{seat}/release", post(release_seat))
}

/* ---------- SHOWINGS ---------- */

// POST /api/showings
async fn create_showing(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<NewShowing>,
) -> BookingResult<(StatusCode, Json<Showing>)> {
    user.require_admin("showings")?;
    let showing = state.services.inventory.create_showing(req).await?;
    Ok((StatusCode::CREATED, Json(showing)))
}

// GET /api/showings?movie_id=&cinema=
async fn list_showings(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ShowingFilter>,
) -> BookingResult<Json<Vec<Showing>>> {
    Ok(Json(state.services.inventory.list_showings(&filter).await?))
}

// GET /api/showings/{id}
async fn get_showing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ShowingId>,
) -> BookingResult<Json<Showing>> {
    Ok(Json(state.services.inventory.showing(id).await?))
}

/* ---------- SEATS ---------- */

// GET /api/showings/{id}/seats
async fn list_seats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ShowingId>,
) -> BookingResult<Json<Vec<Seat>>> {
    let seats = state.cache.get_seats(id, &state.services.inventory).await?;
    Ok(Json(seats))
}

#[derive(Debug, Deserialize)]
struct InitializeSeatsRequest {
    /// Without a template the hall's seat map is taken from the catalog.
    #[serde(default)]
    template: Option<HallTemplate>,
}

// POST /api/showings/{id}/seats/initialize
async fn initialize_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<ShowingId>,
    Json(req): Json<InitializeSeatsRequest>,
) -> BookingResult<Json<InitializeOutcome>> {
    user.require_admin("seat initialization")?;
    let outcome = state.services.inventory.initialize(id, req.template).await?;
    state.cache.invalidate_seats(id).await;
    Ok(Json(outcome))
}

// GET /api/showings/{id}/seats/{seat}
async fn seat_status(
    State(state): State<Arc<AppState>>,
    Path((id, seat)): Path<(ShowingId, String)>,
) -> BookingResult<Json<SeatStatusView>> {
    Ok(Json(state.services.inventory.get_status(id, &seat).await?))
}

// POST /api/showings/{id}/seats/{seat}/hold
async fn hold_seat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, seat)): Path<(ShowingId, String)>,
) -> BookingResult<Json<Seat>> {
    let held = state.services.inventory.hold(id, &seat, user.user_id).await?;
    state.cache.invalidate_seats(id).await;
    Ok(Json(held))
}

// POST /api/showings/{id}/seats/{seat}/release
async fn release_seat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, seat)): Path<(ShowingId, String)>,
) -> BookingResult<Json<Seat>> {
    let released = state.services.inventory.release(id, &seat, user.user_id).await?;
    state.cache.invalidate_seats(id).await;
    Ok(Json(released))
}
