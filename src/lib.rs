// Encrypted token storage
pub mod credentials;

// OAuth provider config, token exchange and refresh
pub mod oauth;

// CRM REST client
pub mod crm;

// Sessions, agents and agent settings
pub mod tenant;

// Bearer token extraction
pub mod auth;

// HTTP APIs
pub mod api;

pub mod config;
pub mod error;
