// HTTP API

pub mod agents;
pub mod auth_middleware;
pub mod callback_page;
pub mod error;
pub mod integration;

pub use agents::{create_agents_router, AgentsAppState};
pub use error::{AppError, ErrorResponse};
pub use integration::{create_integration_router, IntegrationAppState, StatusResponse};
