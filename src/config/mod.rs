use anyhow::Context;
use serde::Deserialize;

/// Complete agentdesk configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Public origin of the dashboard. Used as the postMessage target origin
    /// of the OAuth callback page and for its fallback redirect.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_url: default_public_url(),
        }
    }
}

/// SQLite configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "agentdesk.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// CRM OAuth provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrmConfig {
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Value of the `Version` header the CRM API requires
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Sent as `user_type` on token requests when set
    #[serde(default = "default_user_type")]
    pub user_type: Option<String>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    /// Timeout for every outbound provider request
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_authorize_url() -> String {
    "https://marketplace.gohighlevel.com/oauth/chooselocation".to_string()
}

fn default_token_url() -> String {
    "https://services.leadconnectorhq.com/oauth/token".to_string()
}

fn default_api_base_url() -> String {
    "https://services.leadconnectorhq.com".to_string()
}

fn default_api_version() -> String {
    "2021-07-28".to_string()
}

fn default_scopes() -> Vec<String> {
    [
        "contacts.readonly",
        "contacts.write",
        "conversations.readonly",
        "conversations.write",
        "conversations/message.readonly",
        "conversations/message.write",
        "locations.readonly",
        "users.readonly",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_user_type() -> Option<String> {
    Some("Location".to_string())
}

fn default_http_timeout() -> u64 {
    10
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            api_version: default_api_version(),
            scopes: default_scopes(),
            user_type: default_user_type(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl CrmConfig {
    /// Client id, secret and redirect URI are all present.
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty() && !self.redirect_uri.is_empty()
    }
}

/// Secrets configuration. The encryption key has no default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl AppConfig {
    /// Loads `path` if given, then applies environment overrides.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => load_config(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overrides fields from `AGENTDESK_*` variables looked up through `lookup`.
    ///
    /// Fails on a value that cannot be used rather than keeping the default.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AGENTDESK_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("AGENTDESK_PUBLIC_URL") {
            self.server.public_url = v;
        }
        if let Some(v) = lookup("AGENTDESK_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = lookup("AGENTDESK_CRM_CLIENT_ID") {
            self.crm.client_id = v;
        }
        if let Some(v) = lookup("AGENTDESK_CRM_CLIENT_SECRET") {
            self.crm.client_secret = v;
        }
        if let Some(v) = lookup("AGENTDESK_CRM_REDIRECT_URI") {
            self.crm.redirect_uri = v;
        }
        if let Some(v) = lookup("AGENTDESK_CRM_HTTP_TIMEOUT_SECS") {
            self.crm.http_timeout_secs = v.trim().parse::<u64>().with_context(|| {
                format!(
                    "AGENTDESK_CRM_HTTP_TIMEOUT_SECS must be a positive integer, got '{}'",
                    v
                )
            })?;
        }
        if let Some(v) = lookup("AGENTDESK_ENCRYPTION_KEY") {
            self.security.encryption_key = Some(v);
        }
        self.validate()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.crm.http_timeout_secs == 0 {
            anyhow::bail!("crm.http_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path))?;
    Ok(config)
}
