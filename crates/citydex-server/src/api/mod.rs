pub mod response;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::features::{self, FeatureState};
use crate::ingest::IngestionJobCoordinator;
use crate::middleware;

/// Build the application router with all routes and middleware
pub fn create_router(state: FeatureState, config: &Config) -> Router {
    let coordinator = Arc::clone(&state.coordinator);
    let feature_routes = features::router(state);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health).with_state(coordinator))
        .nest("/api/v1", feature_routes)
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Citydex Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health(State(coordinator): State<Arc<IngestionJobCoordinator>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "running_jobs": coordinator.running_jobs().len()
        })),
    )
}
