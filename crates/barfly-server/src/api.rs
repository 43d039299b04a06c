//! Shared API error type and the health handler.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use barfly_live::LiveError;
use barfly_store::StoreError;
use serde_json::{json, Value};
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            StoreError::Geo(_) | StoreError::InvalidPageToken(_) => {
                ApiError::BadRequest(e.to_string())
            }
            other => {
                tracing::error!(error = %other, "store request failed");
                ApiError::InternalServerError(other.to_string())
            }
        }
    }
}

impl From<LiveError> for ApiError {
    fn from(e: LiveError) -> Self {
        if e.is_invalid_input() {
            return ApiError::BadRequest(e.to_string());
        }
        match e {
            LiveError::InitializationTimeout(_) => ApiError::Timeout(e.to_string()),
            LiveError::Store(store) => store.into(),
            other => {
                tracing::error!(error = %other, "live view request failed");
                ApiError::InternalServerError(other.to_string())
            }
        }
    }
}

/// Handler for `GET /health`.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
