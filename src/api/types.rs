//! API request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::session::{CompletedEntry, SessionStatus};

/// Request from the pipeline to register a collection session.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterSessionRequest {
    /// Identifier of the owning workflow run
    pub run_id: String,

    /// Target repository as `owner/name`
    pub repository: String,

    /// Git ref for the downstream dispatch
    #[serde(default = "default_git_ref")]
    pub git_ref: String,

    /// Build environment tag
    pub environment: String,

    /// Namespace identifier (backing-store location)
    pub namespace: String,

    /// Comma-separated list of secret key names to collect
    pub keys: String,

    /// Session-scoped encryption key
    pub encryption_key: String,

    /// Comma-separated subset of keys to encrypt before storage
    #[serde(default)]
    pub keys_requiring_encryption: String,
}

fn default_git_ref() -> String {
    "main".to_string()
}

/// Response after registering a session.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterSessionResponse {
    pub session_id: Uuid,
    pub pending_count: usize,
}

/// Authorized view of a session for one caller.
#[derive(Debug, Clone, Serialize)]
pub struct SessionViewResponse {
    pub session_id: Uuid,

    pub status: SessionStatus,

    /// Pending keys the caller is authorized to submit
    pub pending_keys: Vec<String>,

    /// Total pending keys, authorized or not
    pub pending_count: usize,

    /// How many pending keys the caller may submit
    pub authorized_count: usize,

    /// Completed keys (who, when; never the values)
    pub completed: Vec<CompletedEntry>,
}

/// Request to submit one secret value.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitSecretRequest {
    pub key: String,
    pub value: String,
}

/// Response after a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitSecretResponse {
    pub session_id: Uuid,
    pub pending_keys: Vec<String>,
    pub all_completed: bool,
}

/// Response for run-id lookup.
#[derive(Debug, Clone, Serialize)]
pub struct RunIdResponse {
    pub session_id: Uuid,
}

/// Response for single-session purge.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeSessionResponse {
    pub purged: bool,
}

/// Response for bulk purge of completed sessions.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeCompletedResponse {
    pub purged: usize,
    pub remaining: usize,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}
