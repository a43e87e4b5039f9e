use super::{validate_endpoint, CrmApi, CrmMethod};
use crate::config::CrmConfig;
use crate::error::IntegrationError;
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct LocationEnvelope {
    location: NamedEntity,
}

#[derive(Debug, Deserialize)]
struct CompanyEnvelope {
    company: NamedEntity,
}

#[derive(Debug, Deserialize)]
struct NamedEntity {
    #[serde(default)]
    name: Option<String>,
}

/// HTTP client for the CRM REST API.
///
/// Sends the bearer token, the API `Version` header and `Accept: application/json`.
pub struct HttpCrmApi {
    http_client: Client,
    base_url: String,
    api_version: String,
}

impl HttpCrmApi {
    pub fn from_config(config: &CrmConfig) -> anyhow::Result<Self> {
        Self::with_base_url(
            config.api_base_url.clone(),
            config.api_version.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    /// Create a client with a custom base URL (for testing with a mock server).
    pub fn with_base_url(
        base_url: String,
        api_version: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .user_agent("agentdesk/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
        })
    }

    async fn send(
        &self,
        access_token: &str,
        method: CrmMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Response, IntegrationError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let method = match method {
            CrmMethod::Get => Method::GET,
            CrmMethod::Post => Method::POST,
            CrmMethod::Put => Method::PUT,
            CrmMethod::Patch => Method::PATCH,
            CrmMethod::Delete => Method::DELETE,
        };

        let mut request = self
            .http_client
            .request(method, &url)
            .bearer_auth(access_token)
            .header("Version", &self.api_version)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IntegrationError::ProviderCallFailed {
                status: 0,
                body: format!("Failed to reach CRM API: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(IntegrationError::ProviderCallFailed {
                status: status.as_u16(),
                body: provider_message(&text),
            });
        }

        Ok(response)
    }
}

/// Pulls `message` out of a JSON error body, else returns the raw text.
fn provider_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| match v.get("message") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            _ => None,
        })
        .unwrap_or_else(|| text.to_string())
}

#[async_trait]
impl CrmApi for HttpCrmApi {
    async fn location_name(
        &self,
        access_token: &str,
        location_id: &str,
    ) -> Result<Option<String>, IntegrationError> {
        let endpoint = format!("/locations/{}", urlencoding::encode(location_id));
        let response = self
            .send(access_token, CrmMethod::Get, &endpoint, None)
            .await?;
        let envelope: LocationEnvelope =
            response
                .json()
                .await
                .map_err(|e| IntegrationError::ProviderCallFailed {
                    status: 200,
                    body: format!("Failed to parse location response: {}", e),
                })?;
        Ok(envelope.location.name)
    }

    async fn company_name(
        &self,
        access_token: &str,
        company_id: &str,
    ) -> Result<Option<String>, IntegrationError> {
        let endpoint = format!("/companies/{}", urlencoding::encode(company_id));
        let response = self
            .send(access_token, CrmMethod::Get, &endpoint, None)
            .await?;
        let envelope: CompanyEnvelope =
            response
                .json()
                .await
                .map_err(|e| IntegrationError::ProviderCallFailed {
                    status: 200,
                    body: format!("Failed to parse company response: {}", e),
                })?;
        Ok(envelope.company.name)
    }

    async fn call(
        &self,
        access_token: &str,
        method: CrmMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, IntegrationError> {
        validate_endpoint(endpoint)?;

        let response = self.send(access_token, method, endpoint, body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| IntegrationError::ProviderCallFailed {
                status: 200,
                body: format!("Failed to read CRM response: {}", e),
            })?;

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        // Some endpoints answer with plain text
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}
