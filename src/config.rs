//! Configuration management for secretgate.
//!
//! Configuration is set via environment variables:
//! - `SECRETGATE_SERVICE_TOKEN` - Required. Token the pipeline uses for register/purge calls.
//! - `STORE_URL` - Required. Base URL of the backing key-value store.
//! - `STORE_TOKEN` - Required. Bearer credential for the backing store.
//! - `DISPATCH_TOKEN` - Required. Privileged credential for downstream workflow dispatch.
//! - `TEAM_RULES` - Optional. JSON array of `{"pattern": "...", "team": "..."}` rules.
//! - `DISPATCH_WORKFLOWS` - Optional. JSON object mapping environment tag to workflow id.
//! - `GITHUB_API_URL` - Optional. Membership/dispatch API base. Defaults to `https://api.github.com`.
//! - `DEFAULT_TEAM` - Optional. Team for the wildcard rule. Defaults to `secrets-admins`.
//! - `KEYSTORE_DIGEST_ENVIRONMENTS` - Optional. Comma list of environments where the
//!   keystore password is derived from the namespace. Defaults to `dev,staging`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// One authorization rule: keys matching `pattern` require membership in `team`.
///
/// Patterns are case-insensitive substrings; `*` matches any key and is the
/// mandatory fallback rule.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TeamRule {
    pub pattern: String,
    pub team: String,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Token presented by the pipeline on register/purge/stats calls
    pub service_token: String,

    /// Base URL of the backing key-value store
    pub store_url: String,

    /// Bearer credential for the backing store
    pub store_token: String,

    /// Privileged credential used for downstream workflow dispatch
    pub dispatch_token: String,

    /// API base for team membership lookups and workflow dispatch
    pub github_api_url: String,

    /// Ordered key-pattern to team rules, wildcard fallback guaranteed last
    pub team_rules: Vec<TeamRule>,

    /// Environment tag to workflow id; unmapped environments skip dispatch
    pub dispatch_workflows: HashMap<String, String>,

    /// Environments where the keystore password is a namespace digest
    pub keystore_digest_environments: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` for any absent required variable
    /// and `ConfigError::InvalidValue` when a JSON table fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let service_token = require_env("SECRETGATE_SERVICE_TOKEN")?;
        let store_url = require_env("STORE_URL")?;
        let store_token = require_env("STORE_TOKEN")?;
        let dispatch_token = require_env("DISPATCH_TOKEN")?;

        let github_api_url = std::env::var("GITHUB_API_URL")
            .unwrap_or_else(|_| "https://api.github.com".to_string());

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let default_team =
            std::env::var("DEFAULT_TEAM").unwrap_or_else(|_| "secrets-admins".to_string());

        let team_rules = match std::env::var("TEAM_RULES") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| ConfigError::InvalidValue("TEAM_RULES".to_string(), e.to_string()))?,
            Err(_) => Vec::new(),
        };
        let team_rules = ensure_wildcard_rule(team_rules, &default_team);

        let dispatch_workflows = match std::env::var("DISPATCH_WORKFLOWS") {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                ConfigError::InvalidValue("DISPATCH_WORKFLOWS".to_string(), e.to_string())
            })?,
            Err(_) => HashMap::new(),
        };

        let keystore_digest_environments = std::env::var("KEYSTORE_DIGEST_ENVIRONMENTS")
            .unwrap_or_else(|_| "dev,staging".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port,
            service_token,
            store_url,
            store_token,
            dispatch_token,
            github_api_url,
            team_rules,
            dispatch_workflows,
            keystore_digest_environments,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            service_token: "test-service-token".to_string(),
            store_url: "http://localhost:8200/v1/secret".to_string(),
            store_token: "test-store-token".to_string(),
            dispatch_token: "test-dispatch-token".to_string(),
            github_api_url: "https://api.github.com".to_string(),
            team_rules: ensure_wildcard_rule(Vec::new(), "secrets-admins"),
            dispatch_workflows: HashMap::new(),
            keystore_digest_environments: vec!["dev".to_string(), "staging".to_string()],
        }
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

/// Append the wildcard fallback rule unless one is already configured, so key
/// resolution is total.
fn ensure_wildcard_rule(mut rules: Vec<TeamRule>, default_team: &str) -> Vec<TeamRule> {
    if !rules.iter().any(|r| r.pattern == "*") {
        rules.push(TeamRule {
            pattern: "*".to_string(),
            team: default_team.to_string(),
        });
    }
    rules
}
