//! HTTP surface: health, metrics, websocket upgrade and the admin API.

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::metrics;
use crate::state::AppState;
use crate::websocket::handlers::ws_handler;

pub mod inventory;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/ws", get(ws_handler))
        .route(
            "/api/v1/inventory/{product_id}",
            get(inventory::fetch).put(inventory::create),
        )
        .route("/api/v1/inventory/{product_id}/update", post(inventory::update))
        .route("/api/v1/inventory/{product_id}/reserve", post(inventory::reserve))
        .route("/api/v1/inventory/{product_id}/fulfill", post(inventory::fulfill))
        .route("/api/v1/inventory/{product_id}/release", post(inventory::release))
        .route("/api/v1/inventory/{product_id}/history", get(inventory::history))
        .route("/api/v1/alerts", get(inventory::alerts))
        .layer(axum::middleware::from_fn(metrics::track_http_metrics))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
