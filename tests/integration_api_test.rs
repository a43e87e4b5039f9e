// Integration tests for the CRM integration API

use agentdesk::api::{create_integration_router, IntegrationAppState};
use agentdesk::credentials::{CredentialCipher, IntegrationStore, NewIntegration, CRM_SERVICE};
use agentdesk::crm::{CrmApi, CrmMethod};
use agentdesk::error::IntegrationError;
use agentdesk::oauth::{OAuthExchangeClient, RefreshedTokens, TokenGrant, TokenLifecycleManager};
use agentdesk::tenant::{Agent, AgentSettings, TenantRegistry};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

struct FakeExchange {
    refresh_calls: AtomicUsize,
    refresh_fails: AtomicBool,
}

#[async_trait]
impl OAuthExchangeClient for FakeExchange {
    fn authorization_url(&self, agent_id: i64) -> String {
        format!("https://auth.example.com/oauth/chooselocation?state={}", agent_id)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, IntegrationError> {
        let expires_in = match code {
            "abc" => 86_400,
            "never-expires" => i64::MAX,
            _ => {
                return Err(IntegrationError::ProviderExchangeFailed {
                    status: Some(400),
                    body: "invalid_grant".to_string(),
                })
            }
        };
        Ok(TokenGrant {
            access_token: "access-1".to_string(),
            refresh_token: "refresh-1".to_string(),
            expires_in,
            location_id: Some("loc-1".to_string()),
            company_id: Some("comp-1".to_string()),
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedTokens, IntegrationError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(IntegrationError::ProviderExchangeFailed {
                status: Some(401),
                body: "refresh token revoked".to_string(),
            });
        }
        Ok(RefreshedTokens {
            access_token: "access-2".to_string(),
            refresh_token: Some("refresh-2".to_string()),
            expires_in: 3600,
        })
    }
}

#[derive(Default)]
struct FakeCrm {
    lookups_fail: AtomicBool,
    calls: Mutex<Vec<(String, CrmMethod, String)>>,
}

#[async_trait]
impl CrmApi for FakeCrm {
    async fn location_name(
        &self,
        _access_token: &str,
        _location_id: &str,
    ) -> Result<Option<String>, IntegrationError> {
        if self.lookups_fail.load(Ordering::SeqCst) {
            return Err(IntegrationError::ProviderCallFailed {
                status: 500,
                body: "upstream error".to_string(),
            });
        }
        Ok(Some("Downtown Office".to_string()))
    }

    async fn company_name(
        &self,
        _access_token: &str,
        _company_id: &str,
    ) -> Result<Option<String>, IntegrationError> {
        Ok(None)
    }

    async fn call(
        &self,
        access_token: &str,
        method: CrmMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, IntegrationError> {
        self.calls.lock().unwrap().push((
            access_token.to_string(),
            method,
            endpoint.to_string(),
        ));
        if endpoint == "/contacts/locked" {
            return Err(IntegrationError::ProviderCallFailed {
                status: 401,
                body: "Invalid JWT, please reconnect".to_string(),
            });
        }
        if endpoint == "/contacts/forbidden" {
            return Err(IntegrationError::ProviderCallFailed {
                status: 403,
                body: "The token does not have access to this location".to_string(),
            });
        }
        Ok(json!({ "endpoint": endpoint, "echo": body }))
    }
}

struct TestApp {
    router: Router,
    store: Arc<IntegrationStore>,
    cipher: CredentialCipher,
    exchange: Arc<FakeExchange>,
    crm: Arc<FakeCrm>,
    tokens: Arc<TokenLifecycleManager>,
}

fn create_test_app() -> TestApp {
    let registry = Arc::new(TenantRegistry::new());
    registry.add_session("tok-alice", "alice");
    registry.add_session("tok-bob", "bob");
    for (id, owner) in [(42, "alice"), (7, "alice"), (99, "bob")] {
        registry.add_agent(Agent {
            id,
            owner_id: owner.to_string(),
            settings: AgentSettings::named("Support Bot"),
        });
    }

    let store = Arc::new(IntegrationStore::new(":memory:").unwrap());
    let cipher = CredentialCipher::new(Some("test-encryption-secret"));
    let exchange = Arc::new(FakeExchange {
        refresh_calls: AtomicUsize::new(0),
        refresh_fails: AtomicBool::new(false),
    });
    let crm = Arc::new(FakeCrm::default());

    let state = IntegrationAppState::new(
        Arc::clone(&store),
        cipher.clone(),
        registry,
        exchange.clone(),
        crm.clone(),
        "https://app.example.com",
    );
    let tokens = Arc::clone(&state.tokens);

    TestApp {
        router: create_integration_router(state),
        store,
        cipher,
        exchange,
        crm,
        tokens,
    }
}

impl TestApp {
    /// Store an active connection for `agent_id` whose access token expires
    /// `expires_in` from now.
    fn seed(&self, agent_id: i64, expires_in: Duration) {
        let record = NewIntegration {
            external_location_id: Some("loc-1".to_string()),
            external_company_id: Some("comp-1".to_string()),
            access_token: self.cipher.seal("access-1").unwrap(),
            refresh_token: self.cipher.seal("refresh-1").unwrap(),
            token_expires_at: Utc::now() + expires_in,
            location_name: Some("Downtown Office".to_string()),
            company_name: Some("Acme".to_string()),
        };
        self.store.upsert(agent_id, CRM_SERVICE, &record).unwrap();
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let (status, bytes) = self
            .send(builder.body(Body::from(body.to_string())).unwrap())
            .await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn status(&self, agent_id: i64) -> Value {
        let request = Request::builder()
            .uri(format!("/api/integrations/crm/status?agent_id={}", agent_id))
            .header("authorization", "Bearer tok-alice")
            .body(Body::empty())
            .unwrap();
        let (status, bytes) = self.send(request).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn callback(&self, query: &str) -> String {
        let request = Request::builder()
            .uri(format!("/api/integrations/crm/callback?{}", query))
            .body(Body::empty())
            .unwrap();
        let (status, bytes) = self.send(request).await;
        assert_eq!(status, StatusCode::OK);
        String::from_utf8(bytes).unwrap()
    }
}

#[tokio::test]
async fn test_connect_callback_status_disconnect() {
    let app = create_test_app();

    let (status, json) = app
        .json("POST", "/api/integrations/crm/connect", Some("tok-alice"), json!({"agent_id": 42}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["auth_url"].as_str().unwrap().ends_with("state=42"));

    let page = app.callback("code=abc&state=42").await;
    assert!(page.contains("GHL_OAUTH_SUCCESS"));

    let record = app.store.get_active(42, CRM_SERVICE).unwrap().unwrap();
    assert_eq!(record.external_location_id.as_deref(), Some("loc-1"));
    assert_eq!(record.location_name.as_deref(), Some("Downtown Office"));
    assert_eq!(record.company_name.as_deref(), Some("Unknown Company"));
    assert_eq!(app.cipher.open(&record.access_token).unwrap(), "access-1");

    let status = app.status(42).await;
    assert_eq!(status["connected"], true);
    assert_eq!(status["expired"], false);
    assert_eq!(status["locationId"], "loc-1");

    let (code, json) = app
        .json("DELETE", "/api/integrations/crm/disconnect", Some("tok-alice"), json!({"agent_id": 42}))
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(json["success"], true);

    let status = app.status(42).await;
    assert_eq!(status["connected"], false);

    let err = app.tokens.get_valid_access_token(42).await.unwrap_err();
    assert!(matches!(err, IntegrationError::NoIntegration));
}

#[tokio::test]
async fn test_connect_requires_session() {
    let app = create_test_app();

    let (status, json) = app
        .json("POST", "/api/integrations/crm/connect", None, json!({"agent_id": 42}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Not authenticated");

    let (status, _) = app
        .json("POST", "/api/integrations/crm/connect", Some("tok-unknown"), json!({"agent_id": 42}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_foreign_agent_is_forbidden() {
    let app = create_test_app();
    app.seed(42, Duration::hours(1));

    let (status, _) = app
        .json("POST", "/api/integrations/crm/connect", Some("tok-bob"), json!({"agent_id": 42}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .json("DELETE", "/api/integrations/crm/disconnect", Some("tok-bob"), json!({"agent_id": 42}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.store.get_active(42, CRM_SERVICE).unwrap().is_some());

    let (status, _) = app
        .json(
            "POST",
            "/api/integrations/crm/call",
            Some("tok-bob"),
            json!({"agent_id": 42, "endpoint": "/contacts/"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.crm.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_status_without_record() {
    let app = create_test_app();

    let status = app.status(42).await;
    assert_eq!(status["connected"], false);
    assert_eq!(status["needsReconnect"], false);
    assert_eq!(status["expiresAt"], Value::Null);
}

#[tokio::test]
async fn test_status_expires_soon() {
    let app = create_test_app();
    app.seed(42, Duration::minutes(2));

    let status = app.status(42).await;
    assert_eq!(status["connected"], true);
    assert_eq!(status["expired"], false);
    assert_eq!(status["expiresSoon"], true);
}

#[tokio::test]
async fn test_callback_provider_error() {
    let app = create_test_app();

    let page = app.callback("error=access_denied&state=42").await;
    assert!(page.contains("GHL_OAUTH_ERROR"));
    assert!(page.contains("access_denied"));
    assert!(app.store.get(42, CRM_SERVICE).unwrap().is_none());
}

#[tokio::test]
async fn test_callback_rejects_non_numeric_state() {
    let app = create_test_app();

    let page = app.callback("code=abc&state=not-an-agent").await;
    assert!(page.contains("GHL_OAUTH_ERROR"));
    assert!(page.contains("Invalid state parameter"));

    let page = app.callback("code=abc&state=12345").await;
    assert!(page.contains("Invalid state parameter"));
}

#[tokio::test]
async fn test_callback_exchange_failure_stores_nothing() {
    let app = create_test_app();

    let page = app.callback("code=expired-code&state=42").await;
    assert!(page.contains("GHL_OAUTH_ERROR"));
    assert!(!page.contains("invalid_grant"));
    assert!(app.store.get(42, CRM_SERVICE).unwrap().is_none());
}

#[tokio::test]
async fn test_callback_survives_name_lookup_failure() {
    let app = create_test_app();
    app.crm.lookups_fail.store(true, Ordering::SeqCst);

    let page = app.callback("code=abc&state=42").await;
    assert!(page.contains("GHL_OAUTH_SUCCESS"));

    let record = app.store.get_active(42, CRM_SERVICE).unwrap().unwrap();
    assert_eq!(record.location_name.as_deref(), Some("Unknown Location"));
}

#[tokio::test]
async fn test_reconnect_reactivates_record() {
    let app = create_test_app();
    app.seed(42, Duration::hours(1));
    app.store.deactivate(42, CRM_SERVICE).unwrap();

    let page = app.callback("code=abc&state=42").await;
    assert!(page.contains("GHL_OAUTH_SUCCESS"));
    assert_eq!(app.status(42).await["connected"], true);
}

#[tokio::test]
async fn test_call_refreshes_expired_token() {
    let app = create_test_app();
    app.seed(7, Duration::minutes(-1));

    let (status, json) = app
        .json(
            "POST",
            "/api/integrations/crm/call",
            Some("tok-alice"),
            json!({"agent_id": 7, "endpoint": "/contacts/", "method": "post", "body": {"name": "Jane"}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["echo"]["name"], "Jane");

    assert_eq!(app.exchange.refresh_calls.load(Ordering::SeqCst), 1);
    let calls = app.crm.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![("access-2".to_string(), CrmMethod::Post, "/contacts/".to_string())]
    );

    let record = app.store.get_active(7, CRM_SERVICE).unwrap().unwrap();
    assert_eq!(app.cipher.open(&record.refresh_token).unwrap(), "refresh-2");
    let remaining = record.token_expires_at - Utc::now();
    assert!(remaining > Duration::seconds(3590) && remaining <= Duration::seconds(3600));
}

#[tokio::test]
async fn test_call_refresh_failure_requires_reconnect() {
    let app = create_test_app();
    app.seed(7, Duration::minutes(-1));
    app.exchange.refresh_fails.store(true, Ordering::SeqCst);

    let (status, json) = app
        .json(
            "POST",
            "/api/integrations/crm/call",
            Some("tok-alice"),
            json!({"agent_id": 7, "endpoint": "/contacts/"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["needsReconnect"], true);
    assert!(app.crm.calls.lock().unwrap().is_empty());

    let status = app.status(7).await;
    assert_eq!(status["connected"], false);
    assert_eq!(status["needsReconnect"], true);

    // Deactivated, so the next call does not retry the refresh
    let (status, _) = app
        .json(
            "POST",
            "/api/integrations/crm/call",
            Some("tok-alice"),
            json!({"agent_id": 7, "endpoint": "/contacts/"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.exchange.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_call_surfaces_provider_error() {
    let app = create_test_app();
    app.seed(42, Duration::hours(1));

    let (status, json) = app
        .json(
            "POST",
            "/api/integrations/crm/call",
            Some("tok-alice"),
            json!({"agent_id": 42, "endpoint": "/contacts/locked"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "Invalid JWT, please reconnect");
    assert_eq!(json["needsReconnect"], true);

    let (status, json) = app
        .json(
            "POST",
            "/api/integrations/crm/call",
            Some("tok-alice"),
            json!({"agent_id": 42, "endpoint": "/contacts/forbidden"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "The token does not have access to this location");
    assert_eq!(json["needsReconnect"], false);
}

#[tokio::test]
async fn test_callback_rejects_out_of_range_lifetime() {
    let app = create_test_app();

    let page = app.callback("code=never-expires&state=42").await;
    assert!(page.contains("GHL_OAUTH_ERROR"));
    assert!(app.store.get(42, CRM_SERVICE).unwrap().is_none());
}

#[tokio::test]
async fn test_call_validates_before_network() {
    let app = create_test_app();
    app.seed(42, Duration::minutes(-1));

    for (endpoint, method) in [
        ("https://evil.example.com/steal", "GET"),
        ("/contacts/../../admin", "GET"),
        ("/contacts/", "TRACE"),
    ] {
        let (status, _) = app
            .json(
                "POST",
                "/api/integrations/crm/call",
                Some("tok-alice"),
                json!({"agent_id": 42, "endpoint": endpoint, "method": method}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}", method, endpoint);
    }

    assert!(app.crm.calls.lock().unwrap().is_empty());
    assert_eq!(app.exchange.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_call_without_integration() {
    let app = create_test_app();

    let (status, json) = app
        .json(
            "POST",
            "/api/integrations/crm/call",
            Some("tok-alice"),
            json!({"agent_id": 42, "endpoint": "/contacts/"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "CRM is not connected");
    assert_eq!(json["needsReconnect"], false);
}

#[tokio::test]
async fn test_connection_test_fetches_location() {
    let app = create_test_app();
    app.seed(42, Duration::hours(1));

    let (status, json) = app
        .json("POST", "/api/integrations/crm/test", Some("tok-alice"), json!({"agent_id": 42}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["endpoint"], "/locations/loc-1");

    let calls = app.crm.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![("access-1".to_string(), CrmMethod::Get, "/locations/loc-1".to_string())]
    );
}
