use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::manifest::ManifestError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("tracker is not running")]
    TrackerStopped,

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ManifestError> for AppError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::NotFound(order_id) => {
                AppError::NotFound(format!("order {order_id} not found"))
            }
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::TrackerStopped => (
                StatusCode::SERVICE_UNAVAILABLE,
                "tracker is not running".to_string(),
            ),
            AppError::Auth(err) => (StatusCode::UNAUTHORIZED, err.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
