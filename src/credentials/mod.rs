//! Encrypted integration credentials.
//!
//! Provider tokens are sealed with AES-256-GCM before they reach SQLite and
//! are only opened by the token lifecycle manager when a caller needs a
//! plaintext access token.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenLifecycleManager              │
//! │  - seal on write, open on read           │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!     SealedToken          SealedToken
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       IntegrationStore                   │
//! │  - one row per (agent, service)          │
//! │  - soft delete via is_active             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use agentdesk::credentials::{CredentialCipher, IntegrationStore, NewIntegration};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> anyhow::Result<()> {
//! let cipher = CredentialCipher::new(std::env::var("AGENTDESK_ENCRYPTION_KEY").ok().as_deref());
//! let store = IntegrationStore::new("agentdesk.db")?;
//!
//! store.upsert(42, "crm", &NewIntegration {
//!     external_location_id: Some("loc_1".to_string()),
//!     external_company_id: None,
//!     access_token: cipher.seal("access")?,
//!     refresh_token: cipher.seal("refresh")?,
//!     token_expires_at: Utc::now() + Duration::hours(24),
//!     location_name: None,
//!     company_name: None,
//! })?;
//!
//! if let Some(record) = store.get_active(42, "crm")? {
//!     println!("connected until {}", record.token_expires_at);
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};

mod encryption;
mod storage;

pub use encryption::{CipherError, CredentialCipher, SealedToken};
pub use storage::IntegrationStore;

/// Service name of the CRM integration.
pub const CRM_SERVICE: &str = "crm";

/// Persisted connection between one agent and one external service.
///
/// Tokens are only ever held sealed here.
#[derive(Clone, Debug)]
pub struct IntegrationRecord {
    pub agent_id: i64,
    pub service: String,
    pub external_location_id: Option<String>,
    pub external_company_id: Option<String>,
    pub access_token: SealedToken,
    pub refresh_token: SealedToken,
    /// After this instant the access token must not be used
    pub token_expires_at: DateTime<Utc>,
    pub location_name: Option<String>,
    pub company_name: Option<String>,
    /// `false` once disconnected by the user or after a failed refresh
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written by a fresh authorization-code exchange.
#[derive(Clone, Debug)]
pub struct NewIntegration {
    pub external_location_id: Option<String>,
    pub external_company_id: Option<String>,
    pub access_token: SealedToken,
    pub refresh_token: SealedToken,
    pub token_expires_at: DateTime<Utc>,
    pub location_name: Option<String>,
    pub company_name: Option<String>,
}
