//! CRM OAuth provider configuration.

use crate::config::CrmConfig;

/// OAuth 2.0 client configuration for the CRM provider.
///
/// Passed explicitly to the exchange client so tests can point it at a mock
/// server instead of reading process-wide settings.
#[derive(Clone, Debug)]
pub struct OAuthProviderConfig {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Fixed scope list requested on every authorization
    pub scopes: Vec<String>,

    pub client_id: String,

    pub client_secret: String,

    /// Callback URL registered with the provider
    pub redirect_uri: String,

    /// Provider-specific `user_type` form field
    pub user_type: Option<String>,
}

impl OAuthProviderConfig {
    pub fn from_crm_config(config: &CrmConfig) -> Self {
        Self {
            auth_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            scopes: config.scopes.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            user_type: config.user_type.clone(),
        }
    }

    /// Build the authorization URL for `agent_id`.
    ///
    /// The agent id travels as `state`, so the callback recovers the tenant
    /// without any server-side session.
    pub fn build_auth_url(&self, agent_id: i64) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes),
            agent_id
        )
    }
}
