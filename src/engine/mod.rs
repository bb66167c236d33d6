//! Session engine: owned in-memory session store with a run-id side index.
//!
//! The store is an explicitly owned object passed to the API layer; callers
//! only ever see engine methods, never the underlying maps. Each session sits
//! behind its own `Mutex`, so the submission transition is serialized per
//! session while different sessions proceed fully in parallel. Network I/O
//! (membership checks, store merges, dispatch) happens outside these locks.

pub mod session;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::EngineError;
use crate::util::parse_key_list;
use session::{Session, SessionContext, SessionStatus, SubmissionEffect};

/// Aggregate counters over all live sessions.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub total_sessions: usize,
    pub awaiting_input: usize,
    pub completed: usize,
    pub pending_secrets: usize,
    pub completed_secrets: usize,
}

/// The session state machine and its indices.
pub struct SessionEngine {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>,
    by_run_id: RwLock<HashMap<String, Uuid>>,
}

impl Default for SessionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEngine {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            by_run_id: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session.
    ///
    /// `key_list` and `keys_requiring_encryption` are comma-separated; the
    /// pending set is derived once, ordered and deduplicated. Registering a
    /// second session for a run id replaces the first so both indices keep
    /// agreeing.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the key list parses to empty or the run id is
    /// blank.
    pub async fn create_session(
        &self,
        context: SessionContext,
        key_list: &str,
        encryption_key: String,
        keys_requiring_encryption: &str,
    ) -> Result<Session, EngineError> {
        if context.run_id.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "Missing workflow run identifier".to_string(),
            ));
        }
        let keys = parse_key_list(key_list);
        if keys.is_empty() {
            return Err(EngineError::InvalidInput(
                "Pending key list is empty".to_string(),
            ));
        }
        let encrypt_keys: HashSet<String> = parse_key_list(keys_requiring_encryption)
            .into_iter()
            .collect();

        let session = Session::new(context, keys, encryption_key, encrypt_keys);
        let snapshot = session.clone();

        let mut sessions = self.sessions.write().await;
        let mut by_run_id = self.by_run_id.write().await;

        if let Some(stale_id) = by_run_id.insert(session.context.run_id.clone(), session.id) {
            sessions.remove(&stale_id);
            tracing::warn!(
                run_id = %session.context.run_id,
                stale_session = %stale_id,
                "Replaced existing session for run id"
            );
        }
        sessions.insert(session.id, Arc::new(Mutex::new(session)));

        tracing::info!(
            session = %snapshot.id,
            run_id = %snapshot.context.run_id,
            pending = snapshot.pending_keys.len(),
            "Session registered"
        );
        Ok(snapshot)
    }

    /// Snapshot a session by id.
    pub async fn get_session(&self, id: Uuid) -> Result<Session, EngineError> {
        let handle = self.session_handle(id).await?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    /// Snapshot the session owned by a workflow run.
    pub async fn find_by_run_id(&self, run_id: &str) -> Result<Session, EngineError> {
        let id = {
            let by_run_id = self.by_run_id.read().await;
            by_run_id.get(run_id).copied()
        };
        match id {
            Some(id) => self.get_session(id).await,
            None => Err(EngineError::NotFound(format!(
                "No session for run id: {}",
                run_id
            ))),
        }
    }

    /// Apply one submission transition atomically under the session lock.
    ///
    /// Returns the post-transition snapshot and the effect; the effect's
    /// `became_complete` flag is the caller's only license to fire the
    /// downstream trigger.
    pub async fn submit_secret(
        &self,
        id: Uuid,
        key: &str,
        submitted_by: &str,
    ) -> Result<(Session, SubmissionEffect), EngineError> {
        let handle = self.session_handle(id).await?;
        let mut session = handle.lock().await;
        let effect = session.apply_submission(key, submitted_by)?;
        tracing::info!(
            session = %id,
            key = %key,
            user = %submitted_by,
            remaining = effect.pending_remaining.len(),
            "Secret submitted"
        );
        Ok((session.clone(), effect))
    }

    /// Remove a session from every index. Returns false if it was unknown.
    pub async fn purge_session(&self, id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        let mut by_run_id = self.by_run_id.write().await;
        let removed = sessions.remove(&id).is_some();
        if removed {
            by_run_id.retain(|_, v| *v != id);
            tracing::info!(session = %id, "Session purged");
        }
        removed
    }

    /// Remove every completed session. Returns `(purged, remaining)`.
    pub async fn purge_completed(&self) -> (usize, usize) {
        let mut sessions = self.sessions.write().await;
        let mut by_run_id = self.by_run_id.write().await;

        let mut completed_ids = Vec::new();
        for (id, handle) in sessions.iter() {
            let session = handle.lock().await;
            if session.status() == SessionStatus::Completed {
                completed_ids.push(*id);
            }
        }
        for id in &completed_ids {
            sessions.remove(id);
        }
        by_run_id.retain(|_, v| !completed_ids.contains(v));

        let remaining = sessions.len();
        if !completed_ids.is_empty() {
            tracing::info!(purged = completed_ids.len(), remaining, "Purged completed sessions");
        }
        (completed_ids.len(), remaining)
    }

    /// Read-only aggregate counters.
    pub async fn stats(&self) -> EngineStats {
        let handles: Vec<Arc<Mutex<Session>>> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };

        let mut stats = EngineStats {
            total_sessions: handles.len(),
            awaiting_input: 0,
            completed: 0,
            pending_secrets: 0,
            completed_secrets: 0,
        };
        for handle in handles {
            let session = handle.lock().await;
            match session.status() {
                SessionStatus::AwaitingInput => stats.awaiting_input += 1,
                SessionStatus::Completed => stats.completed += 1,
            }
            stats.pending_secrets += session.pending_keys.len();
            stats.completed_secrets += session.completed.len();
        }
        stats
    }

    async fn session_handle(&self, id: Uuid) -> Result<Arc<Mutex<Session>>, EngineError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("Unknown session: {}", id)))
    }
}
