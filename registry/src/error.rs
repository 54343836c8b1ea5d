//! Error types for the registry binary: Store failures and request
//! validation, translated to HTTP status in `server.rs`'s handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors raised by [`crate::store::Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("agent not found")]
    NotFound,

    #[error("store backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Errors surfaced by the registry's HTTP handlers.
#[derive(Debug, Error)]
pub enum RegistryApiError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for RegistryApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RegistryApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RegistryApiError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "agent not found".to_string())
            }
            RegistryApiError::Store(StoreError::Backend(e)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
