//! CRM integration endpoints.
//!
//! Authorization code flow, driven from the dashboard:
//! 1. `POST /api/integrations/crm/connect` returns the provider consent URL,
//!    which the dashboard opens in a popup
//! 2. The provider redirects the popup to `GET /api/integrations/crm/callback`
//! 3. The code is exchanged, tokens are sealed and stored, and the popup
//!    reports back to the dashboard
//!
//! After that, `call` and `test` proxy requests to the CRM with a token from
//! the lifecycle manager, which refreshes it when it is about to expire.

use super::auth_middleware::authorize_agent;
use super::callback_page::{self, CallbackOutcome};
use super::error::AppError;
use crate::credentials::{
    CredentialCipher, IntegrationRecord, IntegrationStore, NewIntegration, CRM_SERVICE,
};
use crate::crm::{CrmApi, CrmMethod};
use crate::error::IntegrationError;
use crate::oauth::{
    needs_refresh, token_expiry, OAuthExchangeClient, TokenGrant, TokenLifecycleManager,
};
use crate::tenant::TenantRegistry;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{Html, Json},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const UNKNOWN_LOCATION: &str = "Unknown Location";
const UNKNOWN_COMPANY: &str = "Unknown Company";

/// Shared application state for the integration API
#[derive(Clone)]
pub struct IntegrationAppState {
    pub store: Arc<IntegrationStore>,
    pub cipher: CredentialCipher,
    pub registry: Arc<TenantRegistry>,
    pub exchange: Arc<dyn OAuthExchangeClient>,
    pub crm: Arc<dyn CrmApi>,
    pub tokens: Arc<TokenLifecycleManager>,
    pub public_url: String,
}

impl IntegrationAppState {
    /// Wires a lifecycle manager over the same store, cipher and exchange
    /// client the handlers use.
    pub fn new(
        store: Arc<IntegrationStore>,
        cipher: CredentialCipher,
        registry: Arc<TenantRegistry>,
        exchange: Arc<dyn OAuthExchangeClient>,
        crm: Arc<dyn CrmApi>,
        public_url: &str,
    ) -> Self {
        let tokens = Arc::new(TokenLifecycleManager::new(
            store.clone(),
            cipher.clone(),
            exchange.clone(),
            CRM_SERVICE,
        ));
        Self {
            store,
            cipher,
            registry,
            exchange,
            crm,
            tokens,
            public_url: public_url.to_string(),
        }
    }
}

#[derive(Deserialize)]
pub struct AgentRequest {
    agent_id: i64,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    agent_id: i64,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
pub struct CallRequest {
    agent_id: i64,
    endpoint: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<Value>,
}

#[derive(Serialize)]
pub struct ConnectResponse {
    auth_url: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
pub struct CallResponse {
    success: bool,
    data: Value,
}

/// Connection status as shown on the dashboard
#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connected: bool,
    pub expired: bool,
    pub expires_soon: bool,
    pub needs_reconnect: bool,
    pub location_id: Option<String>,
    pub location_name: Option<String>,
    pub company_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StatusResponse {
    fn disconnected() -> Self {
        Self {
            connected: false,
            expired: false,
            expires_soon: false,
            needs_reconnect: false,
            location_id: None,
            location_name: None,
            company_name: None,
            expires_at: None,
        }
    }

    /// Status of `record` at `now`. `None` means the agent never connected.
    pub fn from_record(record: Option<&IntegrationRecord>, now: DateTime<Utc>) -> Self {
        let Some(record) = record else {
            return Self::disconnected();
        };
        if !record.is_active {
            // Disconnected by the user or by a failed refresh
            return Self {
                needs_reconnect: true,
                ..Self::disconnected()
            };
        }

        let expired = record.token_expires_at <= now;
        Self {
            connected: true,
            expired,
            expires_soon: !expired && needs_refresh(record.token_expires_at, now),
            needs_reconnect: false,
            location_id: record.external_location_id.clone(),
            location_name: record.location_name.clone(),
            company_name: record.company_name.clone(),
            expires_at: Some(record.token_expires_at),
        }
    }
}

/// Create integration API router
pub fn create_integration_router(state: IntegrationAppState) -> Router {
    Router::new()
        .route("/api/integrations/crm/connect", post(connect))
        .route("/api/integrations/crm/callback", get(callback))
        .route("/api/integrations/crm/status", get(status))
        .route("/api/integrations/crm/disconnect", delete(disconnect))
        .route("/api/integrations/crm/call", post(call))
        .route("/api/integrations/crm/test", post(test_connection))
        .with_state(Arc::new(state))
}

/// POST /api/integrations/crm/connect
///
/// Returns the provider's consent URL for the agent. The agent id travels as
/// the OAuth `state` parameter.
async fn connect(
    State(state): State<Arc<IntegrationAppState>>,
    headers: HeaderMap,
    Json(req): Json<AgentRequest>,
) -> Result<Json<ConnectResponse>, AppError> {
    authorize_agent(&headers, req.agent_id, &state.registry)?;

    let auth_url = state.exchange.authorization_url(req.agent_id);
    info!(agent_id = req.agent_id, "CRM authorization started");

    Ok(Json(ConnectResponse { auth_url }))
}

/// GET /api/integrations/crm/callback
///
/// Always answers with the popup page; failures are reported to the opener
/// instead of as an HTTP error.
async fn callback(
    State(state): State<Arc<IntegrationAppState>>,
    Query(params): Query<OAuthCallback>,
) -> Html<String> {
    let outcome = match complete_authorization(&state, params).await {
        Ok(()) => CallbackOutcome::Connected,
        Err(message) => CallbackOutcome::Failed(message),
    };
    callback_page::render(&outcome, &state.public_url)
}

/// Exchange, look up names, seal and store. `Err` is the text shown to the user.
async fn complete_authorization(
    state: &IntegrationAppState,
    params: OAuthCallback,
) -> Result<(), String> {
    if let Some(error) = params.error {
        warn!(
            error = %error,
            description = params.error_description.as_deref().unwrap_or(""),
            "CRM authorization denied"
        );
        return Err(error);
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| "Missing authorization code".to_string())?;

    let agent_id: i64 = params
        .state
        .as_deref()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            warn!(state = ?params.state, "Callback state is not an agent id");
            "Invalid state parameter".to_string()
        })?;

    if state.registry.get_agent(agent_id).is_none() {
        warn!(agent_id, "Callback for unknown agent");
        return Err("Invalid state parameter".to_string());
    }

    let (grant, token_expires_at) = state
        .exchange
        .exchange_code(&code)
        .await
        .and_then(|grant| {
            let expires_at = token_expiry(Utc::now(), grant.expires_in)?;
            Ok((grant, expires_at))
        })
        .map_err(|e| {
            error!(agent_id, error = %e, "Authorization code exchange failed");
            "Failed to connect to CRM".to_string()
        })?;

    let (location_name, company_name) = lookup_display_names(state, &grant).await;

    let sealed = state
        .cipher
        .seal(&grant.access_token)
        .and_then(|access| Ok((access, state.cipher.seal(&grant.refresh_token)?)));
    let (access_token, refresh_token) = sealed.map_err(|e| {
        error!(agent_id, error = %e, "Failed to encrypt CRM tokens");
        "Failed to save CRM connection".to_string()
    })?;

    let record = NewIntegration {
        access_token,
        refresh_token,
        token_expires_at,
        external_location_id: grant.location_id,
        external_company_id: grant.company_id,
        location_name: Some(location_name),
        company_name: Some(company_name),
    };
    state
        .store
        .upsert(agent_id, CRM_SERVICE, &record)
        .map_err(|e| {
            error!(agent_id, error = %e, "Failed to store CRM integration");
            "Failed to save CRM connection".to_string()
        })?;

    info!(agent_id, service = CRM_SERVICE, "CRM connected");
    Ok(())
}

/// Best-effort display names; the connection is stored even if both fail.
async fn lookup_display_names(state: &IntegrationAppState, grant: &TokenGrant) -> (String, String) {
    let location_name = match grant.location_id.as_deref() {
        Some(id) => match state.crm.location_name(&grant.access_token, id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(location_id = %id, error = %e, "Location name lookup failed");
                None
            }
        },
        None => None,
    };

    let company_name = match grant.company_id.as_deref() {
        Some(id) => match state.crm.company_name(&grant.access_token, id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(company_id = %id, error = %e, "Company name lookup failed");
                None
            }
        },
        None => None,
    };

    (
        location_name.unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
        company_name.unwrap_or_else(|| UNKNOWN_COMPANY.to_string()),
    )
}

/// GET /api/integrations/crm/status?agent_id=
async fn status(
    State(state): State<Arc<IntegrationAppState>>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, AppError> {
    authorize_agent(&headers, query.agent_id, &state.registry)?;

    let record = state
        .store
        .get(query.agent_id, CRM_SERVICE)
        .map_err(IntegrationError::from)?;

    Ok(Json(StatusResponse::from_record(record.as_ref(), Utc::now())))
}

/// DELETE /api/integrations/crm/disconnect
///
/// Soft delete: the record is kept but marked inactive.
async fn disconnect(
    State(state): State<Arc<IntegrationAppState>>,
    headers: HeaderMap,
    Json(req): Json<AgentRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    authorize_agent(&headers, req.agent_id, &state.registry)?;

    let changed = state
        .store
        .deactivate(req.agent_id, CRM_SERVICE)
        .map_err(IntegrationError::from)?;

    info!(agent_id = req.agent_id, was_active = changed, "CRM disconnected");
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /api/integrations/crm/call
///
/// Proxies one request to the CRM API on the agent's behalf. Method and
/// endpoint are validated before a token is fetched.
async fn call(
    State(state): State<Arc<IntegrationAppState>>,
    headers: HeaderMap,
    Json(req): Json<CallRequest>,
) -> Result<Json<CallResponse>, AppError> {
    authorize_agent(&headers, req.agent_id, &state.registry)?;

    let method: CrmMethod = req.method.as_deref().unwrap_or("GET").parse()?;
    crate::crm::validate_endpoint(&req.endpoint)?;

    let token = state.tokens.get_valid_access_token(req.agent_id).await?;

    debug!(agent_id = req.agent_id, method = %method, endpoint = %req.endpoint, "Proxying CRM call");
    let data = state
        .crm
        .call(&token, method, &req.endpoint, req.body.as_ref())
        .await?;

    Ok(Json(CallResponse {
        success: true,
        data,
    }))
}

/// POST /api/integrations/crm/test
///
/// Fetches the connected location to check that the stored tokens work.
async fn test_connection(
    State(state): State<Arc<IntegrationAppState>>,
    headers: HeaderMap,
    Json(req): Json<AgentRequest>,
) -> Result<Json<CallResponse>, AppError> {
    authorize_agent(&headers, req.agent_id, &state.registry)?;

    let record = state
        .store
        .get_active(req.agent_id, CRM_SERVICE)
        .map_err(IntegrationError::from)?
        .ok_or(IntegrationError::NoIntegration)?;
    let location_id = record
        .external_location_id
        .ok_or_else(|| AppError::bad_request("Connection has no location id"))?;

    let token = state.tokens.get_valid_access_token(req.agent_id).await?;
    let endpoint = format!("/locations/{}", urlencoding::encode(&location_id));
    let data = state
        .crm
        .call(&token, CrmMethod::Get, &endpoint, None)
        .await?;

    info!(agent_id = req.agent_id, "CRM connection test succeeded");
    Ok(Json(CallResponse {
        success: true,
        data,
    }))
}
