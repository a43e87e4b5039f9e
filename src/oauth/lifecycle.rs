//! Access token lifecycle.
//!
//! Hands out plaintext access tokens, refreshing them shortly before they
//! expire and switching the integration off when a refresh is rejected.

use super::exchange::{token_expiry, OAuthExchangeClient};
use crate::credentials::{CredentialCipher, IntegrationRecord, IntegrationStore};
use crate::error::IntegrationError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Tokens expiring within this margin are refreshed before use.
pub const REFRESH_MARGIN_SECONDS: i64 = 5 * 60;

/// Whether a token expiring at `expires_at` must be refreshed at `now`.
///
/// The boundary is inclusive: exactly five minutes left means refresh.
pub fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at - Duration::seconds(REFRESH_MARGIN_SECONDS) <= now
}

/// Resolves a currently valid access token for one external service.
///
/// Refreshes for the same agent are serialised by a per-agent guard held in
/// this process; the record is re-read under the guard so a waiting caller
/// picks up the token its predecessor just stored.
pub struct TokenLifecycleManager {
    store: Arc<IntegrationStore>,
    cipher: CredentialCipher,
    exchange: Arc<dyn OAuthExchangeClient>,
    service: String,
    refresh_guards: DashMap<i64, Arc<Mutex<()>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<IntegrationStore>,
        cipher: CredentialCipher,
        exchange: Arc<dyn OAuthExchangeClient>,
        service: &str,
    ) -> Self {
        Self {
            store,
            cipher,
            exchange,
            service: service.to_string(),
            refresh_guards: DashMap::new(),
        }
    }

    /// Returns a plaintext access token for `agent_id`.
    ///
    /// # Errors
    /// - `NoIntegration` if there is no active record
    /// - `ReconnectRequired` if the refresh was rejected; the record is
    ///   deactivated first
    /// - `DecryptionFailed` if a stored token cannot be opened
    pub async fn get_valid_access_token(&self, agent_id: i64) -> Result<String, IntegrationError> {
        let record = self.load_active(agent_id)?;
        if !needs_refresh(record.token_expires_at, Utc::now()) {
            return Ok(self.cipher.open(&record.access_token)?);
        }

        let guard = self
            .refresh_guards
            .entry(agent_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _lock = guard.lock().await;
            self.refresh_if_still_needed(agent_id).await
        };

        // Drop the guard entry unless another caller is queued on it
        self.refresh_guards
            .remove_if(&agent_id, |_, g| Arc::strong_count(g) == 2);
        result
    }

    async fn refresh_if_still_needed(&self, agent_id: i64) -> Result<String, IntegrationError> {
        // Another caller may have refreshed while we waited.
        let record = self.load_active(agent_id)?;
        if !needs_refresh(record.token_expires_at, Utc::now()) {
            debug!(agent_id, service = %self.service, "Token refreshed by concurrent caller");
            return Ok(self.cipher.open(&record.access_token)?);
        }

        self.refresh(record).await
    }

    fn load_active(&self, agent_id: i64) -> Result<IntegrationRecord, IntegrationError> {
        self.store
            .get_active(agent_id, &self.service)?
            .ok_or(IntegrationError::NoIntegration)
    }

    async fn refresh(&self, record: IntegrationRecord) -> Result<String, IntegrationError> {
        let agent_id = record.agent_id;
        let refresh_token = self.cipher.open(&record.refresh_token)?;

        info!(
            agent_id,
            service = %self.service,
            expires_at = %record.token_expires_at,
            "Refreshing access token"
        );

        let outcome = self
            .exchange
            .refresh(&refresh_token)
            .await
            .and_then(|refreshed| {
                let expires_at = token_expiry(Utc::now(), refreshed.expires_in)?;
                Ok((refreshed, expires_at))
            });
        let (refreshed, expires_at) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    agent_id,
                    service = %self.service,
                    error = %e,
                    "Token refresh rejected, deactivating integration"
                );
                if let Err(deactivate_err) = self.store.deactivate(agent_id, &self.service) {
                    error!(
                        agent_id,
                        service = %self.service,
                        error = %deactivate_err,
                        "Failed to deactivate integration after refresh failure"
                    );
                    return Err(deactivate_err.into());
                }
                return Err(IntegrationError::ReconnectRequired);
            }
        };

        let new_refresh = refreshed.refresh_token.unwrap_or(refresh_token);

        let sealed_access = self.cipher.seal(&refreshed.access_token)?;
        let sealed_refresh = self.cipher.seal(&new_refresh)?;
        self.store.update_tokens(
            agent_id,
            &self.service,
            &sealed_access,
            &sealed_refresh,
            expires_at,
        )?;

        info!(
            agent_id,
            service = %self.service,
            expires_at = %expires_at,
            "Access token refreshed"
        );

        Ok(refreshed.access_token)
    }
}
