//! Caller authentication for the API.
//!
//! The OAuth login flow lives outside this service; what arrives here is its
//! output: a username and a bearer credential. Human-facing endpoints require
//! both (`Authorization: Bearer <credential>` plus `X-Auth-Username`), and the
//! credential is later used as-is for team-membership lookups. Pipeline-facing
//! endpoints are gated by the configured service token instead.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::routes::AppState;
use crate::access::AuthUser;
use crate::error::EngineError;
use crate::util::constant_time_eq;

/// Header carrying the authenticated username from the login flow.
pub const USERNAME_HEADER: &str = "x-auth-username";

fn bearer_token(req: &Request<Body>) -> Option<String> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Require an authenticated human caller; inserts [`AuthUser`] into request
/// extensions for handlers.
pub async fn require_user(mut req: Request<Body>, next: Next) -> Response {
    let Some(credential) = bearer_token(&req) else {
        return EngineError::Unauthorized("Missing Authorization header".to_string())
            .into_response();
    };

    let username = req
        .headers()
        .get(USERNAME_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if username.is_empty() {
        return EngineError::Unauthorized("Missing X-Auth-Username header".to_string())
            .into_response();
    }

    req.extensions_mut().insert(AuthUser {
        username,
        credential,
    });
    next.run(req).await
}

/// Require the pipeline service token on register/purge/stats endpoints.
pub async fn require_service_token(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&req) else {
        return EngineError::Unauthorized("Missing Authorization header".to_string())
            .into_response();
    };

    if !constant_time_eq(&token, &state.config.service_token) {
        return EngineError::Unauthorized("Invalid service token".to_string()).into_response();
    }
    next.run(req).await
}
