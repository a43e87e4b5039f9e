//! OAuth token exchange logic.
//!
//! Turns authorization codes and refresh tokens into token pairs. Neither call
//! retries: codes are single-use, and a rejected refresh token will not start
//! working on a second attempt.

use super::provider::OAuthProviderConfig;
use crate::error::IntegrationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Longest access token lifetime accepted from the provider (one year).
pub const MAX_TOKEN_LIFETIME_SECONDS: i64 = 365 * 24 * 60 * 60;

fn lifetime_in_range(expires_in: i64) -> bool {
    (1..=MAX_TOKEN_LIFETIME_SECONDS).contains(&expires_in)
}

/// Absolute expiry of a token issued at `now` that lives `expires_in` seconds.
///
/// Lifetimes outside `1..=MAX_TOKEN_LIFETIME_SECONDS` are a provider error.
pub fn token_expiry(
    now: DateTime<Utc>,
    expires_in: i64,
) -> Result<DateTime<Utc>, IntegrationError> {
    let out_of_range = || IntegrationError::ProviderExchangeFailed {
        status: None,
        body: format!("Token lifetime of {}s is out of range", expires_in),
    };
    if !lifetime_in_range(expires_in) {
        return Err(out_of_range());
    }
    chrono::Duration::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(out_of_range)
}

/// Result of an authorization-code exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub location_id: Option<String>,
    pub company_id: Option<String>,
}

/// Result of a refresh-token exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// `None` when the provider did not rotate the refresh token
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// Talks to the provider's authorization server.
#[async_trait]
pub trait OAuthExchangeClient: Send + Sync {
    /// URL the user agent is sent to in order to authorize `agent_id`.
    fn authorization_url(&self, agent_id: i64) -> String;

    /// Exchange an authorization code for a token pair.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, IntegrationError>;

    /// Exchange a refresh token for a renewed token pair.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, IntegrationError>;
}

/// OAuth token response
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(rename = "access_token")]
    access_token: String,
    #[serde(default, rename = "refresh_token")]
    refresh_token: Option<String>,
    #[serde(rename = "expires_in")]
    expires_in: i64,
    #[serde(default)]
    location_id: Option<String>,
    #[serde(default)]
    company_id: Option<String>,
}

/// [`OAuthExchangeClient`] over HTTP.
pub struct HttpExchangeClient {
    config: OAuthProviderConfig,
    http: reqwest::Client,
}

impl HttpExchangeClient {
    /// Every request is bounded by `timeout`; hitting it counts as a failed exchange.
    pub fn new(config: OAuthProviderConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { config, http })
    }

    async fn post_token_form(
        &self,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, IntegrationError> {
        tracing::debug!(token_url = %self.config.token_url, "Calling token endpoint");

        let response = self
            .http
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| IntegrationError::ProviderExchangeFailed {
                status: None,
                body: format!("Failed to send token request: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(IntegrationError::ProviderExchangeFailed {
                status: Some(status.as_u16()),
                body,
            });
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| IntegrationError::ProviderExchangeFailed {
                status: Some(status.as_u16()),
                body: format!("Failed to parse token response: {}", e),
            })?;

        if !lifetime_in_range(token.expires_in) {
            return Err(IntegrationError::ProviderExchangeFailed {
                status: Some(status.as_u16()),
                body: format!("Token response has out-of-range expires_in {}", token.expires_in),
            });
        }

        Ok(token)
    }

    fn base_form<'a>(&'a self, grant_type: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut form = vec![
            ("grant_type", grant_type),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(user_type) = &self.config.user_type {
            form.push(("user_type", user_type.as_str()));
        }
        form
    }
}

#[async_trait]
impl OAuthExchangeClient for HttpExchangeClient {
    fn authorization_url(&self, agent_id: i64) -> String {
        self.config.build_auth_url(agent_id)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, IntegrationError> {
        let mut form = self.base_form("authorization_code");
        form.push(("code", code));
        form.push(("redirect_uri", self.config.redirect_uri.as_str()));

        let token = self.post_token_form(&form).await?;

        let refresh_token = token.refresh_token.ok_or_else(|| {
            IntegrationError::ProviderExchangeFailed {
                status: None,
                body: "Token response did not include a refresh token".to_string(),
            }
        })?;

        tracing::debug!(
            expires_in = token.expires_in,
            has_location = token.location_id.is_some(),
            "Authorization code exchanged"
        );

        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token,
            expires_in: token.expires_in,
            location_id: token.location_id,
            company_id: token.company_id,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, IntegrationError> {
        let mut form = self.base_form("refresh_token");
        form.push(("refresh_token", refresh_token));

        let token = self.post_token_form(&form).await?;

        tracing::debug!(
            expires_in = token.expires_in,
            rotated = token.refresh_token.is_some(),
            "Refresh token exchanged"
        );

        Ok(RefreshedTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
        })
    }
}
