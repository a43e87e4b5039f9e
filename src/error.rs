//! Errors raised by the integration core.

use crate::credentials::CipherError;

/// Failure of an integration operation.
///
/// Authorization and validation variants are raised before any network call.
/// Provider variants carry the raw provider text for operators; handlers
/// decide what the end user sees.
#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The agent does not exist or belongs to someone else. Both cases look
    /// the same to the caller.
    #[error("Access denied")]
    NotAuthorized,

    #[error("CRM is not connected")]
    NoIntegration,

    #[error("Provider token exchange failed with status {status:?}: {body}")]
    ProviderExchangeFailed { status: Option<u16>, body: String },

    #[error("Provider request failed with status {status}: {body}")]
    ProviderCallFailed { status: u16, body: String },

    #[error("CRM connection expired, please reconnect")]
    ReconnectRequired,

    #[error("Failed to decrypt stored credentials: {0}")]
    DecryptionFailed(#[from] CipherError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl IntegrationError {
    /// Whether the message tells the user to reconnect.
    pub fn needs_reconnect(&self) -> bool {
        mentions_reconnect(&self.to_string())
    }
}

/// `true` when `message` mentions reconnecting, in any letter case.
pub fn mentions_reconnect(message: &str) -> bool {
    message.to_lowercase().contains("reconnect")
}
