pub mod admin;
pub mod bookings;
pub mod showings;
pub mod tickets;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(showings::routes())
        .merge(bookings::routes())
        .merge(tickets::routes())
        .merge(admin::routes())
}
