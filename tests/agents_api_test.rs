// Integration tests for agent settings API

use agentdesk::api::{create_agents_router, AgentsAppState};
use agentdesk::tenant::{Agent, AgentSettings, TenantRegistry, TenantStore};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app() -> (Router, Arc<TenantRegistry>, Arc<TenantStore>) {
    let registry = Arc::new(TenantRegistry::new());
    registry.add_session("tok-alice", "alice");
    registry.add_session("tok-bob", "bob");
    registry.add_agent(Agent {
        id: 42,
        owner_id: "alice".to_string(),
        settings: AgentSettings::named("Support Bot"),
    });

    let store = Arc::new(TenantStore::new(":memory:").unwrap());
    let state = AgentsAppState {
        registry: Arc::clone(&registry),
        store: Some(Arc::clone(&store)),
    };

    (create_agents_router(state), registry, store)
}

async fn send(
    app: Router,
    method: &str,
    uri: &str,
    token: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_get_own_agent() {
    let (app, _, _) = create_test_app();

    let (status, json) = send(app, "GET", "/api/agents/42", "tok-alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], 42);
    assert_eq!(json["settings"]["name"], "Support Bot");
}

#[tokio::test]
async fn test_get_foreign_agent_forbidden() {
    let (app, _, _) = create_test_app();

    let (status, json) = send(app.clone(), "GET", "/api/agents/42", "tok-bob", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "Access denied");

    // Same answer for an agent that does not exist
    let (status, _) = send(app, "GET", "/api/agents/4242", "tok-bob", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_patch_updates_and_persists() {
    let (app, registry, store) = create_test_app();

    let (status, json) = send(
        app,
        "PATCH",
        "/api/agents/42",
        "tok-alice",
        Some(json!({"name": "Sales Bot", "enhanced_responses": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["settings"]["name"], "Sales Bot");
    assert_eq!(json["settings"]["enhanced_responses"], true);

    assert_eq!(registry.get_agent(42).unwrap().settings.name, "Sales Bot");
    let persisted = store.load_agents().unwrap();
    assert_eq!(persisted.len(), 1);
    assert!(persisted[0].settings.enhanced_responses);
}

#[tokio::test]
async fn test_patch_rejects_unlisted_field() {
    let (app, registry, store) = create_test_app();

    let (status, json) = send(
        app,
        "PATCH",
        "/api/agents/42",
        "tok-alice",
        Some(json!({"name": "Sales Bot", "owner_id": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("owner_id"));

    let agent = registry.get_agent(42).unwrap();
    assert_eq!(agent.owner_id, "alice");
    assert_eq!(agent.settings.name, "Support Bot");
    assert!(store.load_agents().unwrap().is_empty());
}

#[tokio::test]
async fn test_patch_foreign_agent_changes_nothing() {
    let (app, registry, _) = create_test_app();

    let (status, _) = send(
        app,
        "PATCH",
        "/api/agents/42",
        "tok-bob",
        Some(json!({"name": "Hijacked"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(registry.get_agent(42).unwrap().settings.name, "Support Bot");
}
