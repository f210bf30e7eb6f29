use axum::{extract::State, http::StatusCode, routing::get, Router};
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinema_booking::{config::Config, controllers, AppState};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    if config.is_json_logging() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting cinema booking API ({})", config.app.environment);

    let app_state = AppState::new(config.clone()).await?;

    // --- Start background tasks ---

    if config.reconciliation.enabled {
        let interval = Duration::from_secs(config.reconciliation.interval_seconds.max(1));
        info!(
            "Seat reconciliation every {:?}, grace {}s",
            interval, config.reconciliation.grace_seconds
        );
        tokio::spawn(app_state.services.reconciliation.clone().run_forever(interval));
    } else {
        warn!("Seat reconciliation is disabled");
    }

    // --- Start the web server ---

    let app = Router::new()
        .route("/", get(|| async { "Cinema Booking API v1.0" }))
        .route("/health", get(health))
        .nest("/api", controllers::routes())
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    let db_ok = state.db.ping().await.is_ok();
    let redis_ok = state.redis.ping().await.is_ok();
    if db_ok && redis_ok {
        (StatusCode::OK, "OK")
    } else {
        warn!("Health check failed: db={}, redis={}", db_ok, redis_ok);
        (StatusCode::SERVICE_UNAVAILABLE, "DEGRADED")
    }
}
