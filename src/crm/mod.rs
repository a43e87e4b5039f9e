//! Thin client for the CRM REST API.
//!
//! Used for the best-effort display-name lookup after connecting and for the
//! pass-through call endpoint. It is untyped: callers choose the path, method
//! and JSON body.

mod client;

pub use client::HttpCrmApi;

use crate::error::IntegrationError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// HTTP methods allowed on the pass-through endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrmMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl CrmMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrmMethod::Get => "GET",
            CrmMethod::Post => "POST",
            CrmMethod::Put => "PUT",
            CrmMethod::Patch => "PATCH",
            CrmMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for CrmMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrmMethod {
    type Err = IntegrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(CrmMethod::Get),
            "POST" => Ok(CrmMethod::Post),
            "PUT" => Ok(CrmMethod::Put),
            "PATCH" => Ok(CrmMethod::Patch),
            "DELETE" => Ok(CrmMethod::Delete),
            other => Err(IntegrationError::InvalidRequest(format!(
                "Unsupported method '{}'",
                other
            ))),
        }
    }
}

/// Checks that `endpoint` is a path on the CRM API host.
///
/// Must start with `/`, must not carry a scheme or host, and must not walk up
/// with `..`.
pub fn validate_endpoint(endpoint: &str) -> Result<(), IntegrationError> {
    let invalid = |reason: &str| -> Result<(), IntegrationError> {
        Err(IntegrationError::InvalidRequest(format!(
            "Invalid endpoint '{}': {}",
            endpoint, reason
        )))
    };

    if !endpoint.starts_with('/') || endpoint.starts_with("//") {
        return invalid("must be a path starting with '/'");
    }
    if endpoint.contains("://") {
        return invalid("must not include a scheme");
    }
    if endpoint.split(['/', '?']).any(|segment| segment == "..") {
        return invalid("must not contain '..'");
    }
    if endpoint.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return invalid("must not contain whitespace");
    }
    Ok(())
}

/// CRM REST API, authenticated with a bearer access token.
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// Name of the location (sub-account) `location_id`.
    async fn location_name(
        &self,
        access_token: &str,
        location_id: &str,
    ) -> Result<Option<String>, IntegrationError>;

    /// Name of the agency `company_id`.
    async fn company_name(
        &self,
        access_token: &str,
        company_id: &str,
    ) -> Result<Option<String>, IntegrationError>;

    /// Forwards one request and returns the JSON response body.
    ///
    /// Non-2xx responses become `ProviderCallFailed` carrying the provider's
    /// error text.
    async fn call(
        &self,
        access_token: &str,
        method: CrmMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, IntegrationError>;
}
