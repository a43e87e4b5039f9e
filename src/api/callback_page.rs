//! HTML returned by the OAuth callback.
//!
//! The page runs inside the popup the dashboard opened for the provider's
//! consent screen. It posts the outcome to the opener and closes itself, or
//! navigates to the dashboard when it was opened without one.

use axum::response::Html;
use serde_json::json;

pub const SUCCESS_MESSAGE_TYPE: &str = "GHL_OAUTH_SUCCESS";
pub const ERROR_MESSAGE_TYPE: &str = "GHL_OAUTH_ERROR";

/// Outcome reported to the opener window
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Connected,
    Failed(String),
}

/// Scheme, host and port of `public_url`, the only origin allowed to receive
/// the message.
pub fn target_origin(public_url: &str) -> String {
    match reqwest::Url::parse(public_url) {
        Ok(url) if url.has_host() => url.origin().ascii_serialization(),
        _ => public_url.trim_end_matches('/').to_string(),
    }
}

/// Serializes `value` as a JS literal that can sit inside a `<script>` block.
fn script_literal(value: &serde_json::Value) -> String {
    value.to_string().replace("</", "<\\/")
}

fn fallback_url(public_url: &str, outcome: &CallbackOutcome) -> String {
    let status = match outcome {
        CallbackOutcome::Connected => "connected",
        CallbackOutcome::Failed(_) => "error",
    };
    format!(
        "{}/dashboard?crm={}",
        public_url.trim_end_matches('/'),
        status
    )
}

pub fn render(outcome: &CallbackOutcome, public_url: &str) -> Html<String> {
    let (title, message) = match outcome {
        CallbackOutcome::Connected => (
            "CRM connected",
            json!({ "type": SUCCESS_MESSAGE_TYPE }),
        ),
        CallbackOutcome::Failed(error) => (
            "CRM connection failed",
            json!({ "type": ERROR_MESSAGE_TYPE, "error": error }),
        ),
    };

    let message = script_literal(&message);
    let origin = script_literal(&json!(target_origin(public_url)));
    let fallback = script_literal(&json!(fallback_url(public_url, outcome)));

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
<p>{title}. You can close this window.</p>
<script>
(function () {{
  var message = {message};
  if (window.opener && !window.opener.closed) {{
    window.opener.postMessage(message, {origin});
    window.close();
  }} else {{
    window.location.replace({fallback});
  }}
}})();
</script>
</body>
</html>
"#
    ))
}
