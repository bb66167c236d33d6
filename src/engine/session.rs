//! Session state: pending/completed keys, audit log, and the one-key
//! submission transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::EngineError;

/// Pipeline-supplied context, read-only after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    /// Identifier of the owning workflow run
    pub run_id: String,
    /// Target repository as `owner/name`
    pub repository: String,
    /// Target git ref for the downstream dispatch
    pub git_ref: String,
    /// Build environment tag (selects the downstream workflow)
    pub environment: String,
    /// Namespace identifier (backing-store location, digest input)
    pub namespace: String,
}

impl SessionContext {
    /// Organization owning the repository, used for membership lookups.
    pub fn org(&self) -> String {
        self.repository
            .split('/')
            .next()
            .unwrap_or(&self.repository)
            .to_string()
    }
}

/// Per-key completion state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Pending,
    Completed,
}

/// Overall session state, always derived from the pending set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    AwaitingInput,
    Completed,
}

/// Record of one completed key. The processed value itself is never retained
/// here; it lives only in the backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedEntry {
    pub key: String,
    pub submitted_by: String,
    pub timestamp: DateTime<Utc>,
}

/// Audit actions recorded on the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SecretSubmitted,
    AllSecretsCompleted,
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// Result of a successful submission transition.
#[derive(Debug, Clone)]
pub struct SubmissionEffect {
    /// True only for the submission that emptied the pending set. This is
    /// the sole signal allowed to fire the downstream trigger.
    pub became_complete: bool,
    pub pending_remaining: Vec<String>,
}

/// One in-flight secret-collection request.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub context: SessionContext,
    pub pending_keys: Vec<String>,
    pub completed: Vec<CompletedEntry>,
    pub key_status: HashMap<String, KeyStatus>,
    pub audit_log: Vec<AuditRecord>,
    pub encryption_key: String,
    pub keys_requiring_encryption: HashSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a session tracking `keys` as pending.
    ///
    /// The caller (engine) validates that `keys` is non-empty and that the
    /// context carries a run id.
    pub fn new(
        context: SessionContext,
        keys: Vec<String>,
        encryption_key: String,
        keys_requiring_encryption: HashSet<String>,
    ) -> Self {
        let key_status = keys
            .iter()
            .map(|k| (k.clone(), KeyStatus::Pending))
            .collect();
        Self {
            id: Uuid::new_v4(),
            context,
            pending_keys: keys,
            completed: Vec::new(),
            key_status,
            audit_log: Vec::new(),
            encryption_key,
            keys_requiring_encryption,
            created_at: Utc::now(),
        }
    }

    /// Overall status, a pure function of the pending set.
    pub fn status(&self) -> SessionStatus {
        if self.pending_keys.is_empty() {
            SessionStatus::Completed
        } else {
            SessionStatus::AwaitingInput
        }
    }

    /// Total number of keys originally requested.
    pub fn total_keys(&self) -> usize {
        self.key_status.len()
    }

    /// Apply one submission as a single atomic unit.
    ///
    /// On success: the key leaves the pending set, a completed entry and an
    /// audit record are appended, and the key status flips. If this was the
    /// last pending key, a distinct `all_secrets_completed` audit record is
    /// appended and the effect reports `became_complete`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session never tracked `key`; `AlreadyProcessed` if
    /// the key is tracked but no longer pending. Neither mutates state.
    pub fn apply_submission(
        &mut self,
        key: &str,
        submitted_by: &str,
    ) -> Result<SubmissionEffect, EngineError> {
        match self.key_status.get(key) {
            None => {
                return Err(EngineError::NotFound(format!(
                    "Key not part of this session: {}",
                    key
                )))
            }
            Some(KeyStatus::Completed) => {
                return Err(EngineError::AlreadyProcessed(key.to_string()))
            }
            Some(KeyStatus::Pending) => {}
        }

        let now = Utc::now();
        self.pending_keys.retain(|k| k != key);
        self.completed.push(CompletedEntry {
            key: key.to_string(),
            submitted_by: submitted_by.to_string(),
            timestamp: now,
        });
        self.key_status
            .insert(key.to_string(), KeyStatus::Completed);
        self.audit_log.push(AuditRecord {
            timestamp: now,
            action: AuditAction::SecretSubmitted,
            key: Some(key.to_string()),
            actor: Some(submitted_by.to_string()),
        });

        let became_complete = self.pending_keys.is_empty();
        if became_complete {
            self.audit_log.push(AuditRecord {
                timestamp: now,
                action: AuditAction::AllSecretsCompleted,
                key: None,
                actor: None,
            });
        }

        Ok(SubmissionEffect {
            became_complete,
            pending_remaining: self.pending_keys.clone(),
        })
    }
}
