//! OAuth 2.0 authorization-code flow and token lifecycle for the CRM.
//!
//! 1. `POST /api/integrations/crm/connect` returns the provider authorization URL
//! 2. User authorizes on the provider's site (popup window)
//! 3. Provider redirects to `/api/integrations/crm/callback` with `code` and `state`
//! 4. Code is exchanged for tokens, sealed, and stored
//! 5. Later calls ask [`TokenLifecycleManager`] for a valid access token

mod exchange;
mod lifecycle;
mod provider;

pub use exchange::{
    token_expiry, HttpExchangeClient, OAuthExchangeClient, RefreshedTokens, TokenGrant,
    MAX_TOKEN_LIFETIME_SECONDS,
};
pub use lifecycle::{needs_refresh, TokenLifecycleManager, REFRESH_MARGIN_SECONDS};
pub use provider::OAuthProviderConfig;
