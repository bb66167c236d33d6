//! Per-key team authorization.
//!
//! Each secret key maps to a required team through an ordered list of
//! case-insensitive substring rules (first match wins; a wildcard rule is the
//! guaranteed fallback). Membership is checked against an external oracle
//! with the caller's own credential; any lookup failure denies access.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::TeamRule;
use crate::engine::session::SessionContext;

/// An authenticated caller: username plus the bearer credential produced by
/// the out-of-scope login flow.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub credential: String,
}

/// External membership check.
///
/// A not-found answer from the backend maps to `Ok(false)`; transport and
/// server errors surface as `Err` and are treated as denial by the resolver.
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn is_member(
        &self,
        credential: &str,
        org: &str,
        team: &str,
        username: &str,
    ) -> anyhow::Result<bool>;
}

/// Team membership oracle backed by the GitHub teams API.
pub struct GithubMembershipOracle {
    client: reqwest::Client,
    api_base: String,
}

impl GithubMembershipOracle {
    pub fn new(api_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MembershipOracle for GithubMembershipOracle {
    async fn is_member(
        &self,
        credential: &str,
        org: &str,
        team: &str,
        username: &str,
    ) -> anyhow::Result<bool> {
        let url = format!(
            "{}/orgs/{}/teams/{}/memberships/{}",
            self.api_base, org, team, username
        );

        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", credential))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "secretgate")
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Membership lookup failed: {} - {}", status, body);
        }

        #[derive(serde::Deserialize)]
        struct Membership {
            state: String,
        }

        let membership: Membership = resp.json().await?;
        Ok(membership.state == "active")
    }
}

/// Resolves the required team for a key and verifies caller membership.
pub struct TeamAccessResolver {
    rules: Vec<TeamRule>,
    oracle: Arc<dyn MembershipOracle>,
}

impl TeamAccessResolver {
    /// Build a resolver from the configured rule list.
    ///
    /// The rule list must already carry its wildcard fallback (the config
    /// loader guarantees this), so [`resolve_required_team`] is total.
    ///
    /// [`resolve_required_team`]: TeamAccessResolver::resolve_required_team
    pub fn new(rules: Vec<TeamRule>, oracle: Arc<dyn MembershipOracle>) -> Self {
        Self { rules, oracle }
    }

    /// Map a key name to its required team. First matching rule wins;
    /// patterns are case-insensitive substrings and `*` matches everything.
    pub fn resolve_required_team(&self, key: &str) -> &TeamRule {
        let key_lower = key.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.pattern == "*" || key_lower.contains(&rule.pattern.to_lowercase()))
            .unwrap_or_else(|| {
                // Config loading appends the wildcard rule, so this is the
                // last rule in practice.
                self.rules.last().expect("team rule list is never empty")
            })
    }

    /// Check whether `user` may touch `key` in the org named by the session
    /// context. Fail-closed: any oracle error denies access.
    pub async fn verify_access(&self, user: &AuthUser, key: &str, ctx: &SessionContext) -> bool {
        let rule = self.resolve_required_team(key);
        match self
            .oracle
            .is_member(&user.credential, &ctx.org(), &rule.team, &user.username)
            .await
        {
            Ok(member) => member,
            Err(e) => {
                tracing::warn!(
                    user = %user.username,
                    key = %key,
                    team = %rule.team,
                    "Membership lookup failed, denying access: {}",
                    e
                );
                false
            }
        }
    }

    /// Filter `keys` down to the ones `user` is authorized for. Each key is
    /// checked independently; a denial or lookup failure on one key never
    /// aborts the rest of the batch.
    pub async fn filter_authorized(
        &self,
        user: &AuthUser,
        keys: &[String],
        ctx: &SessionContext,
    ) -> Vec<String> {
        let mut authorized = Vec::new();
        for key in keys {
            if self.verify_access(user, key, ctx).await {
                authorized.push(key.clone());
            }
        }
        authorized
    }
}
