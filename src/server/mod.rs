mod handlers;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::location::{SharedConsent, SmartLocationResolver};
pub use state::AppState;

pub fn build_router(resolver: Arc<SmartLocationResolver>, consent: SharedConsent) -> Router {
    let state = Arc::new(AppState { resolver, consent });

    Router::new()
        .route("/api/location", get(handlers::resolve).put(handlers::update))
        .route("/api/location/select", post(handlers::select))
        .route("/api/location/home", post(handlers::promote_home))
        .route("/api/location/history", get(handlers::history))
        .route("/api/stations", get(handlers::stations))
        .route("/api/stations/nearby", get(handlers::nearby))
        .route("/api/consent", get(handlers::consent).put(handlers::set_consent))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(
    host: &str,
    port: u16,
    resolver: Arc<SmartLocationResolver>,
    consent: SharedConsent,
) -> std::io::Result<()> {
    let app = build_router(resolver, consent);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!("cannot bind to {}: {}", addr, e);
        e
    })?;

    info!("pickup locator listening on http://{}", addr);
    axum::serve(listener, app).await
}
