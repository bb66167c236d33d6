//! Error taxonomy shared by the engine and the HTTP surface.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use thiserror::Error;

/// Typed failures produced by the session engine and its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed registration payload (empty key list, blank run id, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown session or a key the session never tracked
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or invalid caller credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not in the required team for any relevant key
    #[error("Forbidden: authorized for {authorized} of {pending} pending key(s)")]
    Forbidden { pending: usize, authorized: usize },

    /// Key resubmitted after it was already completed
    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    /// Backing store unreachable or returned an unexpected status
    #[error("Store unavailable: status {status}: {body}")]
    StoreUnavailable { status: u16, body: String },

    /// Downstream workflow dispatch call failed
    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    /// Unexpected internal failure (cipher setup, serialization)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EngineError::Forbidden { .. } => StatusCode::FORBIDDEN,
            EngineError::AlreadyProcessed(_) => StatusCode::CONFLICT,
            EngineError::StoreUnavailable { .. } => StatusCode::BAD_GATEWAY,
            EngineError::DispatchFailed(_) => StatusCode::BAD_GATEWAY,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            EngineError::Forbidden {
                pending,
                authorized,
            } => serde_json::json!({
                "error": self.to_string(),
                "pending": pending,
                "authorized": authorized,
            }),
            EngineError::StoreUnavailable {
                status: store_status,
                body,
            } => serde_json::json!({
                "error": self.to_string(),
                "store_status": store_status,
                "store_body": body,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
