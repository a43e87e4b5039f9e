use crate::auth::extract_bearer_token;
use crate::error::IntegrationError;
use crate::tenant::{Agent, TenantRegistry};
use axum::http::HeaderMap;
use tracing::debug;


/// Authorize access to one agent
///
/// Resolves the bearer session token to a user and checks that the user owns
/// `agent_id`. Runs before anything touches the agent's integration records.
///
/// # Errors
/// - NotAuthenticated: missing, malformed or unknown session token
/// - NotAuthorized: agent missing or owned by another user (indistinguishable)
pub fn authorize_agent(
    headers: &HeaderMap,
    agent_id: i64,
    registry: &TenantRegistry,
) -> Result<Agent, IntegrationError> {
    let token = extract_bearer_token(headers).map_err(|e| {
        debug!(error = %e, "Rejecting request without usable session token");
        IntegrationError::NotAuthenticated
    })?;

    let user_id = registry
        .user_for_token(&token)
        .ok_or(IntegrationError::NotAuthenticated)?;

    registry.validate_owner(&user_id, agent_id).map_err(|_| {
        debug!(user_id = %user_id, agent_id, "Agent not owned by caller");
        IntegrationError::NotAuthorized
    })
}
