use crate::error::{mentions_reconnect, IntegrationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

/// Error response
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(rename = "needsReconnect")]
    pub needs_reconnect: bool,
}

/// HTTP mapping of [`IntegrationError`]
#[derive(Debug)]
pub struct AppError(pub IntegrationError);

impl From<IntegrationError> for AppError {
    fn from(e: IntegrationError) -> Self {
        AppError(e)
    }
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError(IntegrationError::InvalidRequest(msg.into()))
    }

    /// Status code and the message shown to the user.
    fn parts(&self) -> (StatusCode, String) {
        match &self.0 {
            IntegrationError::NotAuthenticated => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            IntegrationError::NotAuthorized => (StatusCode::FORBIDDEN, self.0.to_string()),
            IntegrationError::NoIntegration => (StatusCode::NOT_FOUND, self.0.to_string()),
            IntegrationError::ReconnectRequired => (StatusCode::CONFLICT, self.0.to_string()),
            IntegrationError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            IntegrationError::ProviderExchangeFailed { .. } => (
                StatusCode::BAD_GATEWAY,
                "Failed to authorize with the CRM provider".to_string(),
            ),
            IntegrationError::ProviderCallFailed { status, body } => {
                // CRM-side auth failures must not look like our own 401/403
                let code = match *status {
                    401 | 403 if mentions_reconnect(body) => StatusCode::CONFLICT,
                    401 | 403 => StatusCode::BAD_GATEWAY,
                    other => match StatusCode::from_u16(other) {
                        Ok(code) if code.is_client_error() => code,
                        _ => StatusCode::BAD_GATEWAY,
                    },
                };
                (code, body.clone())
            }
            IntegrationError::DecryptionFailed(_) | IntegrationError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.parts();

        // Operators get the raw provider/storage detail, users get `message`
        if status.is_server_error() {
            error!(status = %status, error = %self.0, "Request failed");
        }

        let body = Json(ErrorResponse {
            needs_reconnect: mentions_reconnect(&message),
            error: message,
        });

        (status, body).into_response()
    }
}
