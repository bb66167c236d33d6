//! Session endpoint handlers.
//!
//! These orchestrate the collaborators around the engine: authorization via
//! the team resolver, value processing via the crypto policy, the merge into
//! the backing store, and the one-shot downstream dispatch. All network I/O
//! happens outside the per-session lock; only `engine.submit_secret` touches
//! session state, and it alone decides completion.

use axum::{
    extract::{Extension, Path, State},
    response::Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::routes::AppState;
use super::types::{
    PurgeCompletedResponse, PurgeSessionResponse, RegisterSessionRequest, RegisterSessionResponse,
    RunIdResponse, SessionViewResponse, SubmitSecretRequest, SubmitSecretResponse,
};
use crate::access::AuthUser;
use crate::crypto::{self, ValuePolicy};
use crate::dispatch::{CompletionSnapshot, DispatchOutcome};
use crate::engine::session::{KeyStatus, SessionContext};
use crate::engine::EngineStats;
use crate::error::EngineError;

/// POST /api/admin/sessions
/// Register a collection session (pipeline-facing).
pub async fn register_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterSessionRequest>,
) -> Result<Json<RegisterSessionResponse>, EngineError> {
    let context = SessionContext {
        run_id: req.run_id,
        repository: req.repository,
        git_ref: req.git_ref,
        environment: req.environment,
        namespace: req.namespace,
    };

    let session = state
        .engine
        .create_session(
            context,
            &req.keys,
            req.encryption_key,
            &req.keys_requiring_encryption,
        )
        .await?;

    Ok(Json(RegisterSessionResponse {
        session_id: session.id,
        pending_count: session.pending_keys.len(),
    }))
}

/// GET /api/sessions/:id
/// Pending-key view filtered to what the caller is authorized for.
///
/// A caller authorized for none of the pending keys gets `403` carrying the
/// pending/authorized counts.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionViewResponse>, EngineError> {
    let session = state.engine.get_session(id).await?;

    let authorized = state
        .access
        .filter_authorized(&user, &session.pending_keys, &session.context)
        .await;

    if authorized.is_empty() && !session.pending_keys.is_empty() {
        return Err(EngineError::Forbidden {
            pending: session.pending_keys.len(),
            authorized: 0,
        });
    }

    Ok(Json(SessionViewResponse {
        session_id: session.id,
        status: session.status(),
        pending_count: session.pending_keys.len(),
        authorized_count: authorized.len(),
        pending_keys: authorized,
        completed: session.completed,
    }))
}

/// POST /api/sessions/:id/secrets
/// Submit one secret value.
pub async fn submit_secret(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitSecretRequest>,
) -> Result<Json<SubmitSecretResponse>, EngineError> {
    let snapshot = state.engine.get_session(id).await?;

    // Reject early, before any network call. The engine repeats these checks
    // authoritatively under the session lock.
    match snapshot.key_status.get(&req.key) {
        None => {
            return Err(EngineError::NotFound(format!(
                "Key not part of this session: {}",
                req.key
            )))
        }
        Some(KeyStatus::Completed) => return Err(EngineError::AlreadyProcessed(req.key)),
        Some(KeyStatus::Pending) => {}
    }

    if !state
        .access
        .verify_access(&user, &req.key, &snapshot.context)
        .await
    {
        return Err(EngineError::Forbidden {
            pending: snapshot.pending_keys.len(),
            authorized: 0,
        });
    }

    let policy = ValuePolicy {
        encryption_key: &snapshot.encryption_key,
        keys_requiring_encryption: &snapshot.keys_requiring_encryption,
        environment: &snapshot.context.environment,
        namespace: &snapshot.context.namespace,
        keystore_digest_environments: &state.config.keystore_digest_environments,
    };
    let value = crypto::process_value(&req.key, &req.value, &policy)
        .map_err(|e| EngineError::Internal(e.to_string()))?;

    // Merge into the backing store before recording the transition, so a
    // completed key always has its value persisted. Two callers racing on the
    // same key can both reach this write; the engine then rejects the loser
    // with `AlreadyProcessed`, but last-write-wins in the store means the
    // persisted value may be the loser's while the audit names the winner.
    state
        .store
        .update_single_key(
            &snapshot.context.namespace,
            &state.config.store_token,
            &req.key,
            &value,
        )
        .await?;

    let (session, effect) = state.engine.submit_secret(id, &req.key, &user.username).await?;

    if effect.became_complete {
        // Fire-and-forget: a failed dispatch never reopens the session, it is
        // logged and left for external retry.
        let dispatcher = Arc::clone(&state.dispatcher);
        let completed = CompletionSnapshot::from_session(&session);
        tokio::spawn(async move {
            match dispatcher.fire(&completed).await {
                Ok(DispatchOutcome::Dispatched { workflow }) => {
                    tracing::info!(workflow = %workflow, "Completion dispatch sent");
                }
                Ok(DispatchOutcome::Skipped { reason }) => {
                    tracing::info!("Completion dispatch skipped: {}", reason);
                }
                Err(e) => {
                    tracing::error!("Completion dispatch failed: {}", e);
                }
            }
        });
    }

    Ok(Json(SubmitSecretResponse {
        session_id: id,
        pending_keys: effect.pending_remaining,
        all_completed: effect.became_complete,
    }))
}

/// GET /api/sessions/by-run/:run_id
pub async fn session_by_run_id(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunIdResponse>, EngineError> {
    let session = state.engine.find_by_run_id(&run_id).await?;
    Ok(Json(RunIdResponse {
        session_id: session.id,
    }))
}

/// DELETE /api/admin/sessions/:id (pipeline-facing, idempotent)
pub async fn purge_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<PurgeSessionResponse> {
    let purged = state.engine.purge_session(id).await;
    Json(PurgeSessionResponse { purged })
}

/// POST /api/admin/sessions/purge-completed (pipeline-facing, idempotent)
pub async fn purge_completed(State(state): State<Arc<AppState>>) -> Json<PurgeCompletedResponse> {
    let (purged, remaining) = state.engine.purge_completed().await;
    Json(PurgeCompletedResponse { purged, remaining })
}

/// GET /api/admin/sessions/stats (pipeline-facing, read-only)
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<EngineStats> {
    Json(state.engine.stats().await)
}
