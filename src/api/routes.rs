//! HTTP router and shared application state.

use std::sync::Arc;

use axum::{
    extract::State,
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::access::{GithubMembershipOracle, TeamAccessResolver};
use crate::config::Config;
use crate::dispatch::{Dispatcher, WorkflowDispatcher};
use crate::engine::SessionEngine;
use crate::store_client::ExternalStoreClient;

use super::auth;
use super::sessions;
use super::types::HealthResponse;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// The session state machine and its indices
    pub engine: SessionEngine,
    /// Per-key team authorization
    pub access: TeamAccessResolver,
    /// Backing key-value store client
    pub store: ExternalStoreClient,
    /// Downstream workflow trigger
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl AppState {
    /// Wire the production collaborators from config.
    pub fn new(config: Config) -> Self {
        let oracle = Arc::new(GithubMembershipOracle::new(&config.github_api_url));
        let access = TeamAccessResolver::new(config.team_rules.clone(), oracle);
        let store = ExternalStoreClient::new(&config.store_url);
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(WorkflowDispatcher::new(
            &config.github_api_url,
            &config.dispatch_token,
            config.dispatch_workflows.clone(),
        ));

        Self {
            config,
            engine: SessionEngine::new(),
            access,
            store,
            dispatcher,
        }
    }
}

/// Build the API router for the given state.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/api/health", get(health));

    // Pipeline-facing endpoints, gated by the service token
    let service_routes = Router::new()
        .route("/api/admin/sessions", post(sessions::register_session))
        .route("/api/admin/sessions/stats", get(sessions::stats))
        .route(
            "/api/admin/sessions/purge-completed",
            post(sessions::purge_completed),
        )
        .route("/api/admin/sessions/:id", delete(sessions::purge_session))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_service_token,
        ));

    // Human-facing endpoints, requiring the login flow's identity output
    let user_routes = Router::new()
        .route("/api/sessions/:id", get(sessions::get_session))
        .route("/api/sessions/:id/secrets", post(sessions::submit_secret))
        .route(
            "/api/sessions/by-run/:run_id",
            get(sessions::session_by_run_id),
        )
        .layer(middleware::from_fn(auth::require_user));

    Router::new()
        .merge(public_routes)
        .merge(service_routes)
        .merge(user_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// GET /api/health
async fn health(State(_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::access::MembershipOracle;
    use crate::dispatch::{CompletionSnapshot, DispatchOutcome};
    use crate::error::EngineError;

    /// Oracle granting a fixed set of (team, username) memberships.
    struct FixedOracle {
        members: HashSet<(String, String)>,
    }

    #[async_trait]
    impl MembershipOracle for FixedOracle {
        async fn is_member(
            &self,
            _credential: &str,
            _org: &str,
            team: &str,
            username: &str,
        ) -> anyhow::Result<bool> {
            Ok(self
                .members
                .contains(&(team.to_string(), username.to_string())))
        }
    }

    /// Dispatcher counting its invocations.
    struct CountingDispatcher {
        fired: AtomicUsize,
    }

    #[async_trait]
    impl Dispatcher for CountingDispatcher {
        async fn fire(
            &self,
            _snapshot: &CompletionSnapshot,
        ) -> Result<DispatchOutcome, EngineError> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(DispatchOutcome::Dispatched {
                workflow: "provision.yml".to_string(),
            })
        }
    }

    struct TestHarness {
        app: Router,
        dispatcher: Arc<CountingDispatcher>,
        store_server: MockServer,
    }

    /// Router with a store mock, a fixed membership oracle (alice in
    /// `backend`, bob in `platform`), and a counting dispatcher.
    async fn harness() -> TestHarness {
        let store_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acme/widgets/staging"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&store_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/acme/widgets/staging"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&store_server)
            .await;

        let mut config = Config::for_tests();
        config.store_url = store_server.uri();
        config.team_rules = vec![
            crate::config::TeamRule {
                pattern: "db_".to_string(),
                team: "backend".to_string(),
            },
            crate::config::TeamRule {
                pattern: "api".to_string(),
                team: "platform".to_string(),
            },
            crate::config::TeamRule {
                pattern: "*".to_string(),
                team: "secrets-admins".to_string(),
            },
        ];

        let oracle = FixedOracle {
            members: HashSet::from([
                ("backend".to_string(), "alice".to_string()),
                ("platform".to_string(), "bob".to_string()),
            ]),
        };
        let dispatcher = Arc::new(CountingDispatcher {
            fired: AtomicUsize::new(0),
        });

        let state = Arc::new(AppState {
            access: TeamAccessResolver::new(config.team_rules.clone(), Arc::new(oracle)),
            store: ExternalStoreClient::new(&config.store_url),
            dispatcher: Arc::clone(&dispatcher) as Arc<dyn Dispatcher>,
            engine: SessionEngine::new(),
            config,
        });

        TestHarness {
            app: router(state),
            dispatcher,
            store_server,
        }
    }

    fn service_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer test-service-token")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn user_request(
        method: Method,
        uri: &str,
        username: &str,
        body: Option<serde_json::Value>,
    ) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer user-oauth-token")
            .header("X-Auth-Username", username)
            .header(header::CONTENT_TYPE, "application/json")
            .body(match body {
                Some(b) => Body::from(b.to_string()),
                None => Body::empty(),
            })
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn register_body() -> serde_json::Value {
        serde_json::json!({
            "run_id": "42",
            "repository": "acme/widgets",
            "environment": "staging",
            "namespace": "acme/widgets/staging",
            "keys": "db_password,api_key",
            "encryption_key": "session-key",
            "keys_requiring_encryption": "db_password,api_key",
        })
    }

    async fn register(harness: &TestHarness) -> String {
        let resp = harness
            .app
            .clone()
            .oneshot(service_request(
                Method::POST,
                "/api/admin/sessions",
                register_body(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["pending_count"], 2);
        body["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let h = harness().await;
        let resp = h
            .app
            .clone()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_requires_service_token() {
        let h = harness().await;
        let resp = h
            .app
            .clone()
            .oneshot(
                Request::post("/api/admin/sessions")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(register_body().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(resp).await;
        assert_eq!(body["error"], "Unauthorized: Missing Authorization header");
    }

    #[tokio::test]
    async fn wrong_service_token_is_rejected_with_typed_error() {
        let h = harness().await;
        let resp = h
            .app
            .clone()
            .oneshot(
                Request::post("/api/admin/sessions")
                    .header(header::AUTHORIZATION, "Bearer not-the-token")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(register_body().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(resp).await;
        assert_eq!(body["error"], "Unauthorized: Invalid service token");
    }

    #[tokio::test]
    async fn register_rejects_empty_key_list() {
        let h = harness().await;
        let mut body = register_body();
        body["keys"] = serde_json::json!(" , ");
        let resp = h
            .app
            .clone()
            .oneshot(service_request(Method::POST, "/api/admin/sessions", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn full_collection_flow_dispatches_exactly_once() {
        let h = harness().await;
        let id = register(&h).await;

        // Session is discoverable by run id
        let resp = h
            .app
            .clone()
            .oneshot(user_request(
                Method::GET,
                "/api/sessions/by-run/42",
                "alice",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["session_id"], id.as_str());

        // Alice (backend) submits the db password
        let resp = h
            .app
            .clone()
            .oneshot(user_request(
                Method::POST,
                &format!("/api/sessions/{}/secrets", id),
                "alice",
                Some(serde_json::json!({"key": "db_password", "value": "secret1"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["pending_keys"], serde_json::json!(["api_key"]));
        assert_eq!(body["all_completed"], false);
        assert_eq!(h.dispatcher.fired.load(Ordering::SeqCst), 0);

        // Bob (platform) submits the api key, completing the session
        let resp = h
            .app
            .clone()
            .oneshot(user_request(
                Method::POST,
                &format!("/api/sessions/{}/secrets", id),
                "bob",
                Some(serde_json::json!({"key": "api_key", "value": "secret2"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["pending_keys"], serde_json::json!([]));
        assert_eq!(body["all_completed"], true);

        // The dispatch task is spawned; give it a beat
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.dispatcher.fired.load(Ordering::SeqCst), 1);

        // Resubmitting a completed key conflicts and fires nothing more
        let resp = h
            .app
            .clone()
            .oneshot(user_request(
                Method::POST,
                &format!("/api/sessions/{}/secrets", id),
                "bob",
                Some(serde_json::json!({"key": "api_key", "value": "again"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.dispatcher.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_resubmission_skips_the_store_write() {
        let h = harness().await;
        let id = register(&h).await;

        let resp = h
            .app
            .clone()
            .oneshot(user_request(
                Method::POST,
                &format!("/api/sessions/{}/secrets", id),
                "alice",
                Some(serde_json::json!({"key": "db_password", "value": "first"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // Sequential resubmission is caught before the store merge, so the
        // persisted value stays "first". Only a true race (both callers past
        // the pending check) can hit the documented last-write-wins window.
        let resp = h
            .app
            .clone()
            .oneshot(user_request(
                Method::POST,
                &format!("/api/sessions/{}/secrets", id),
                "alice",
                Some(serde_json::json!({"key": "db_password", "value": "second"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let store_posts = h
            .store_server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == "POST")
            .count();
        assert_eq!(store_posts, 1);
    }

    #[tokio::test]
    async fn unauthorized_team_member_cannot_submit() {
        let h = harness().await;
        let id = register(&h).await;

        // Bob is in platform, not backend
        let resp = h
            .app
            .clone()
            .oneshot(user_request(
                Method::POST,
                &format!("/api/sessions/{}/secrets", id),
                "bob",
                Some(serde_json::json!({"key": "db_password", "value": "nope"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // Key is still pending in alice's view
        let resp = h
            .app
            .clone()
            .oneshot(user_request(
                Method::GET,
                &format!("/api/sessions/{}", id),
                "alice",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["pending_count"], 2);
        assert_eq!(body["pending_keys"], serde_json::json!(["db_password"]));
    }

    #[tokio::test]
    async fn view_is_forbidden_when_authorized_for_zero_keys() {
        let h = harness().await;
        let id = register(&h).await;

        let resp = h
            .app
            .clone()
            .oneshot(user_request(
                Method::GET,
                &format!("/api/sessions/{}", id),
                "mallory",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body = json_body(resp).await;
        assert_eq!(body["pending"], 2);
        assert_eq!(body["authorized"], 0);
    }

    #[tokio::test]
    async fn user_endpoints_require_identity_headers() {
        let h = harness().await;
        let id = register(&h).await;

        // Missing username header
        let resp = h
            .app
            .clone()
            .oneshot(
                Request::get(format!("/api/sessions/{}", id))
                    .header(header::AUTHORIZATION, "Bearer tok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(resp).await;
        assert_eq!(body["error"], "Unauthorized: Missing X-Auth-Username header");

        // Missing bearer credential
        let resp = h
            .app
            .clone()
            .oneshot(
                Request::get(format!("/api/sessions/{}", id))
                    .header("X-Auth-Username", "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(resp).await;
        assert_eq!(body["error"], "Unauthorized: Missing Authorization header");
    }

    #[tokio::test]
    async fn purge_endpoints_are_idempotent() {
        let h = harness().await;
        let id = register(&h).await;

        let resp = h
            .app
            .clone()
            .oneshot(service_request(
                Method::DELETE,
                &format!("/api/admin/sessions/{}", id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["purged"], true);

        let resp = h
            .app
            .clone()
            .oneshot(service_request(
                Method::DELETE,
                &format!("/api/admin/sessions/{}", id),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["purged"], false);
    }

    #[tokio::test]
    async fn stats_reflect_registered_sessions() {
        let h = harness().await;
        register(&h).await;

        let resp = h
            .app
            .clone()
            .oneshot(service_request(
                Method::GET,
                "/api/admin/sessions/stats",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["total_sessions"], 1);
        assert_eq!(body["awaiting_input"], 1);
        assert_eq!(body["pending_secrets"], 2);
    }
}
