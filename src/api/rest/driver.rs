use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::tracker::TrackerStatus;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/driver", get(get_driver))
        .route("/driver/online", post(go_online))
        .route("/driver/offline", post(go_offline))
        .route("/driver/city", put(change_city))
}

#[derive(Deserialize)]
pub struct ChangeCityRequest {
    pub city: String,
}

async fn get_driver(State(state): State<Arc<AppState>>) -> Json<TrackerStatus> {
    Json(state.tracker.status())
}

async fn go_online(State(state): State<Arc<AppState>>) -> Result<Json<TrackerStatus>, AppError> {
    state.tracker.go_online().await?;
    Ok(Json(state.tracker.status()))
}

async fn go_offline(State(state): State<Arc<AppState>>) -> Result<Json<TrackerStatus>, AppError> {
    state.tracker.go_offline().await?;
    Ok(Json(state.tracker.status()))
}

async fn change_city(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChangeCityRequest>,
) -> Result<Json<TrackerStatus>, AppError> {
    let city = payload.city.trim();
    if city.is_empty() {
        return Err(AppError::BadRequest("city cannot be empty".to_string()));
    }

    state.tracker.change_city(city).await?;
    Ok(Json(state.tracker.status()))
}
