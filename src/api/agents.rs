use super::auth_middleware::authorize_agent;
use super::error::AppError;
use crate::error::IntegrationError;
use crate::tenant::{apply_updates, Agent, AgentSettings, TenantRegistry, TenantStore};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

/// Shared application state for the agents API
#[derive(Clone)]
pub struct AgentsAppState {
    pub registry: Arc<TenantRegistry>,
    /// Settings are written through when present
    pub store: Option<Arc<TenantStore>>,
}

#[derive(Serialize, Debug)]
pub struct AgentResponse {
    pub id: i64,
    pub settings: AgentSettings,
}

impl From<Agent> for AgentResponse {
    fn from(agent: Agent) -> Self {
        Self {
            id: agent.id,
            settings: agent.settings,
        }
    }
}

/// Create agents API router
pub fn create_agents_router(state: AgentsAppState) -> Router {
    Router::new()
        .route("/api/agents/:id", get(get_agent).patch(update_agent))
        .with_state(Arc::new(state))
}

/// GET /api/agents/:id
async fn get_agent(
    State(state): State<Arc<AgentsAppState>>,
    Path(agent_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<AgentResponse>, AppError> {
    let agent = authorize_agent(&headers, agent_id, &state.registry)?;
    Ok(Json(agent.into()))
}

/// PATCH /api/agents/:id
///
/// Body is a JSON object of settings fields. Fields outside the allow-list
/// reject the whole update.
async fn update_agent(
    State(state): State<Arc<AgentsAppState>>,
    Path(agent_id): Path<i64>,
    headers: HeaderMap,
    Json(updates): Json<Map<String, Value>>,
) -> Result<Json<AgentResponse>, AppError> {
    let mut agent = authorize_agent(&headers, agent_id, &state.registry)?;

    agent.settings =
        apply_updates(&agent.settings, &updates).map_err(|e| AppError::bad_request(e.to_string()))?;

    if let Some(store) = &state.store {
        store.save_agent(&agent).map_err(IntegrationError::from)?;
    }
    state.registry.update_settings(agent_id, agent.settings.clone());

    let fields: Vec<&str> = updates.keys().map(String::as_str).collect();
    info!(agent_id, fields = ?fields, "Agent settings updated");

    Ok(Json(agent.into()))
}
