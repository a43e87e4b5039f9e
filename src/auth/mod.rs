use axum::http::HeaderMap;


/// Extract the session token from the HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <session token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Parse "Bearer <token>", scheme case-insensitive
fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Why a request carries no usable session token
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum TokenError {
    #[error("No session token in Authorization header")]
    Missing,
    /// Not `Bearer <token>`, or the header is not visible ASCII
    #[error("Authorization header is not a bearer token")]
    InvalidFormat,
    #[error("Session token is empty")]
    Empty,
}
