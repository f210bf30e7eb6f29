use axum::{extract::State, routing::post, Json, Router};
use std::sync::Arc;

use crate::error::BookingResult;
use crate::middleware::AuthUser;
use crate::services::ReconciliationStats;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/admin/reconcile", post(reconcile))
}

// POST /api/admin/reconcile
async fn reconcile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> BookingResult<Json<ReconciliationStats>> {
    user.require_admin("reconciliation")?;
    // Кеш карт мест живёт недолго, поэтому после сверки его не сбрасываем
    Ok(Json(state.services.reconciliation.run_once().await?))
}
