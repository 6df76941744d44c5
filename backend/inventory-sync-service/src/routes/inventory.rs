//! Admin inventory endpoints. Each maps 1:1 onto an engine operation and
//! returns the updated record on success or the structured error body from
//! `AppError`.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::{Alert, InventoryChangeRecord, InventoryRecord, InventoryUpdate, Operation};
use crate::state::AppState;

fn default_actor() -> String {
    "admin-api".into()
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub quantity: i64,
    pub low_stock_threshold: Option<i64>,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub quantity: i64,
    pub operation: Operation,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_actor")]
    pub actor: String,
    pub order_ref: Option<String>,
}

/// Body shared by the reserve/fulfill/release order endpoints.
#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub quantity: i64,
    pub order_ref: Option<String>,
    #[serde(default = "default_actor")]
    pub actor: String,
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> AppResult<Json<InventoryRecord>> {
    Ok(Json(state.engine.get(&product_id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(body): Json<CreateRequest>,
) -> AppResult<Json<InventoryRecord>> {
    let record = state
        .engine
        .create(&product_id, body.quantity, body.low_stock_threshold, &body.actor)
        .await?;
    Ok(Json(record))
}

pub async fn update(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(body): Json<UpdateRequest>,
) -> AppResult<Json<InventoryRecord>> {
    if body.quantity < 0 {
        return Err(AppError::Validation("quantity must be non-negative".into()));
    }
    let record = state
        .engine
        .apply(InventoryUpdate {
            product_id,
            quantity: body.quantity,
            operation: body.operation,
            reason: body.reason,
            actor: body.actor,
            order_ref: body.order_ref,
        })
        .await?;
    Ok(Json(record))
}

pub async fn reserve(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(body): Json<OrderRequest>,
) -> AppResult<Json<InventoryRecord>> {
    apply_order_op(state, product_id, body, Operation::Reserve, "order reservation").await
}

pub async fn fulfill(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(body): Json<OrderRequest>,
) -> AppResult<Json<InventoryRecord>> {
    apply_order_op(state, product_id, body, Operation::Fulfill, "order fulfillment").await
}

pub async fn release(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(body): Json<OrderRequest>,
) -> AppResult<Json<InventoryRecord>> {
    apply_order_op(state, product_id, body, Operation::Release, "reservation released").await
}

async fn apply_order_op(
    state: AppState,
    product_id: String,
    body: OrderRequest,
    operation: Operation,
    reason: &str,
) -> AppResult<Json<InventoryRecord>> {
    if body.quantity < 0 {
        return Err(AppError::Validation("quantity must be non-negative".into()));
    }
    let record = state
        .engine
        .apply(InventoryUpdate {
            product_id,
            quantity: body.quantity,
            operation,
            reason: reason.into(),
            actor: body.actor,
            order_ref: body.order_ref,
        })
        .await?;
    Ok(Json(record))
}

pub async fn history(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> AppResult<Json<Vec<InventoryChangeRecord>>> {
    Ok(Json(state.engine.history(&product_id).await?))
}

pub async fn alerts(State(state): State<AppState>) -> Json<Vec<Alert>> {
    Json(state.engine.active_alerts().await)
}
