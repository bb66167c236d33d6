//! HTTP API for the secret-collection service.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `POST /api/admin/sessions` - Register a collection session (service token)
//! - `GET /api/admin/sessions/stats` - Session/secret counters (service token)
//! - `POST /api/admin/sessions/purge-completed` - Drop completed sessions (service token)
//! - `DELETE /api/admin/sessions/{id}` - Drop one session (service token)
//! - `GET /api/sessions/{id}` - Authorized pending-key view (user auth)
//! - `POST /api/sessions/{id}/secrets` - Submit one secret value (user auth)
//! - `GET /api/sessions/by-run/{run_id}` - Find the session for a workflow run (user auth)

pub mod auth;
mod routes;
pub mod sessions;
pub mod types;

pub use routes::{serve, AppState};
pub use types::*;
