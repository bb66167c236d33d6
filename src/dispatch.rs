//! Downstream workflow trigger.
//!
//! When a session completes, the engine fires one workflow-dispatch call for
//! the follow-on automation job. The target workflow is selected by the
//! session's environment tag; an environment with no configured workflow is a
//! skip, not an error. The dispatch uses a privileged service credential,
//! never the submitting user's own.
//!
//! Exactly-once is the caller's responsibility: only the submission that
//! empties the pending set may call [`Dispatcher::fire`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::engine::session::{Session, SessionContext};
use crate::error::EngineError;

/// What the downstream job receives about the completed session.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionSnapshot {
    #[serde(flatten)]
    pub context: SessionContext,
    pub completed_at: DateTime<Utc>,
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
}

impl CompletionSnapshot {
    /// Build the dispatch payload from a completed session.
    pub fn from_session(session: &Session) -> Self {
        Self {
            context: session.context.clone(),
            completed_at: Utc::now(),
            total: session.total_keys(),
            completed: session.completed.len(),
            pending: session.pending_keys.len(),
        }
    }
}

/// Result of a fire attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched { workflow: String },
    /// No workflow is configured for the session's environment
    Skipped { reason: String },
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn fire(&self, snapshot: &CompletionSnapshot) -> Result<DispatchOutcome, EngineError>;
}

/// Dispatcher issuing GitHub workflow-dispatch calls.
pub struct WorkflowDispatcher {
    client: reqwest::Client,
    api_base: String,
    token: String,
    /// Environment tag to workflow id
    workflows: HashMap<String, String>,
}

impl WorkflowDispatcher {
    pub fn new(api_base: &str, token: &str, workflows: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            workflows,
        }
    }
}

#[async_trait]
impl Dispatcher for WorkflowDispatcher {
    async fn fire(&self, snapshot: &CompletionSnapshot) -> Result<DispatchOutcome, EngineError> {
        let environment = &snapshot.context.environment;
        let Some(workflow) = self.workflows.get(environment) else {
            return Ok(DispatchOutcome::Skipped {
                reason: format!("No workflow configured for environment '{}'", environment),
            });
        };

        let url = format!(
            "{}/repos/{}/actions/workflows/{}/dispatches",
            self.api_base, snapshot.context.repository, workflow
        );
        // The dispatch API takes a single opaque string-valued input field
        let payload = serde_json::to_string(snapshot)
            .map_err(|e| EngineError::DispatchFailed(e.to_string()))?;
        let body = serde_json::json!({
            "ref": snapshot.context.git_ref,
            "inputs": { "payload": payload },
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "secretgate")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::DispatchFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::DispatchFailed(format!(
                "{} - {}",
                status, body
            )));
        }

        tracing::info!(
            run_id = %snapshot.context.run_id,
            workflow = %workflow,
            "Downstream workflow dispatched"
        );
        Ok(DispatchOutcome::Dispatched {
            workflow: workflow.clone(),
        })
    }
}
