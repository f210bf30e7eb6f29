use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BookingResult;
use crate::middleware::AuthUser;
use crate::models::{Seat, ShowingCoordinates, Ticket};
use crate::services::NewTicket;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tickets", post(create_ticket).get(get_user_tickets))
        .route("/tickets/check-seats", post(check_seats))
        .route("/tickets/{id}", get(get_ticket))
        .route("/tickets/{id}/cancel", post(cancel_ticket))
}

// POST /api/tickets
async fn create_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<NewTicket>,
) -> BookingResult<(StatusCode, Json<Ticket>)> {
    let ticket = state.services.tickets.create_ticket(user.requester(), req).await?;
    state.cache.invalidate_seats(ticket.showing_id).await;
    Ok((StatusCode::CREATED, Json(ticket)))
}

// GET /api/tickets
async fn get_user_tickets(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> BookingResult<Json<Vec<Ticket>>> {
    Ok(Json(state.services.tickets.list_user_tickets(user.requester()).await?))
}

// GET /api/tickets/{id}
async fn get_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> BookingResult<Json<Ticket>> {
    Ok(Json(state.services.tickets.get_ticket(id, user.requester()).await?))
}

// POST /api/tickets/{id}/cancel
async fn cancel_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> BookingResult<Json<Ticket>> {
    let ticket = state.services.tickets.cancel_ticket(id, user.requester()).await?;
    state.cache.invalidate_seats(ticket.showing_id).await;
    Ok(Json(ticket))
}

// POST /api/tickets/check-seats
async fn check_seats(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ShowingCoordinates>,
) -> BookingResult<Json<Vec<Seat>>> {
    Ok(Json(state.services.tickets.check_seats(&req).await?))
}
