use agentdesk::api::{
    callback_page::target_origin, create_agents_router, create_integration_router,
    AgentsAppState, IntegrationAppState,
};
use agentdesk::config::AppConfig;
use agentdesk::credentials::{CredentialCipher, IntegrationStore};
use agentdesk::crm::HttpCrmApi;
use agentdesk::oauth::{HttpExchangeClient, OAuthProviderConfig};
use agentdesk::tenant::{TenantRegistry, TenantStore};
use anyhow::{Context, Result};
use axum::http::HeaderValue;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentdesk=info".into()),
        )
        .init();

    info!("agentdesk starting...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("AGENTDESK_CONFIG").ok());
    let config = AppConfig::load(config_path.as_deref())?;

    info!(
        bind_addr = %config.server.bind_addr,
        public_url = %config.server.public_url,
        db_path = %config.database.path,
        "Configuration loaded"
    );

    let cipher = CredentialCipher::new(config.security.encryption_key.as_deref());
    if !cipher.is_configured() {
        warn!("AGENTDESK_ENCRYPTION_KEY not set; CRM connections cannot be stored or used");
    }
    if !config.crm.is_complete() {
        warn!("CRM OAuth client is not fully configured (client id, secret and redirect URI)");
    }

    let integration_store = Arc::new(
        IntegrationStore::new(&config.database.path)
            .context("Failed to initialize integration store")?,
    );
    let tenant_store = Arc::new(
        TenantStore::new(&config.database.path).context("Failed to initialize tenant store")?,
    );
    let registry = Arc::new(
        TenantRegistry::load(Arc::clone(&tenant_store))
            .context("Failed to load sessions and agents")?,
    );
    info!(agents = registry.agent_count(), "Tenant registry loaded");

    let timeout = Duration::from_secs(config.crm.http_timeout_secs);
    let exchange = Arc::new(HttpExchangeClient::new(
        OAuthProviderConfig::from_crm_config(&config.crm),
        timeout,
    )?);
    let crm = Arc::new(HttpCrmApi::from_config(&config.crm)?);

    let integration_state = IntegrationAppState::new(
        integration_store,
        cipher,
        Arc::clone(&registry),
        exchange,
        crm,
        &config.server.public_url,
    );
    let agents_state = AgentsAppState {
        registry,
        store: Some(tenant_store),
    };

    let origin: HeaderValue = target_origin(&config.server.public_url)
        .parse()
        .context("AGENTDESK_PUBLIC_URL is not a valid origin")?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = create_integration_router(integration_state)
        .merge(create_agents_router(agents_state))
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "HTTP API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("agentdesk stopped");

    Ok(())
}
