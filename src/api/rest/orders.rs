use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::order::{Order, OrderId};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order).delete(remove_order))
        .route("/orders/:id/status", patch(update_order_status))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

async fn list_orders(State(state): State<Arc<AppState>>) -> Json<Vec<Order>> {
    Json(state.tracker.orders().as_ref().clone())
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    state
        .tracker
        .orders()
        .iter()
        .find(|order| order.order_id == id)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
}

async fn update_order_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.status.trim().is_empty() {
        return Err(AppError::BadRequest("status cannot be empty".to_string()));
    }

    state.tracker.update_order_status(id, payload.status.trim()).await?;
    get_order(State(state), Path(id)).await
}

async fn remove_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Result<StatusCode, AppError> {
    state.tracker.remove_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
