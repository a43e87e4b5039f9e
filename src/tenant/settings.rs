//! Allow-listed agent settings updates.
//!
//! Each updatable field has one setter in [`SETTERS`]. An update naming any
//! other field, or giving a value of the wrong type, is rejected as a whole.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chatbot settings editable from the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub name: String,
    pub welcome_message: String,
    pub system_prompt: String,
    /// Longer, context-enriched answers
    pub enhanced_responses: bool,
    /// Widget accent colour as `#rrggbb`
    pub widget_color: String,
}

impl AgentSettings {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            welcome_message: "Hi! How can I help you today?".to_string(),
            system_prompt: String::new(),
            enhanced_responses: false,
            widget_color: "#2563eb".to_string(),
        }
    }
}

/// Rejected settings update
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("Unknown or read-only field '{0}'")]
    UnknownField(String),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

type Setter = fn(&mut AgentSettings, &Value) -> Result<(), String>;

/// Field name → setter. The only fields an update may touch.
const SETTERS: &[(&str, Setter)] = &[
    ("name", set_name),
    ("welcome_message", set_welcome_message),
    ("system_prompt", set_system_prompt),
    ("enhanced_responses", set_enhanced_responses),
    ("widget_color", set_widget_color),
];

const MAX_NAME_LEN: usize = 80;
const MAX_TEXT_LEN: usize = 8_000;

fn string_value(value: &Value, max_len: usize) -> Result<String, String> {
    let s = value.as_str().ok_or("expected a string")?;
    if s.chars().count() > max_len {
        return Err(format!("longer than {} characters", max_len));
    }
    Ok(s.to_string())
}

fn set_name(settings: &mut AgentSettings, value: &Value) -> Result<(), String> {
    let name = string_value(value, MAX_NAME_LEN)?;
    if name.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    settings.name = name;
    Ok(())
}

fn set_welcome_message(settings: &mut AgentSettings, value: &Value) -> Result<(), String> {
    settings.welcome_message = string_value(value, MAX_TEXT_LEN)?;
    Ok(())
}

fn set_system_prompt(settings: &mut AgentSettings, value: &Value) -> Result<(), String> {
    settings.system_prompt = string_value(value, MAX_TEXT_LEN)?;
    Ok(())
}

fn set_enhanced_responses(settings: &mut AgentSettings, value: &Value) -> Result<(), String> {
    settings.enhanced_responses = value.as_bool().ok_or("expected a boolean")?;
    Ok(())
}

fn set_widget_color(settings: &mut AgentSettings, value: &Value) -> Result<(), String> {
    let color = string_value(value, 7)?;
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err("expected a colour like #1a2b3c".to_string());
    }
    settings.widget_color = color.to_ascii_lowercase();
    Ok(())
}

/// Applies `updates` to a copy of `settings` and returns the copy.
///
/// `settings` itself is never modified, so a rejected update changes nothing.
pub fn apply_updates(
    settings: &AgentSettings,
    updates: &Map<String, Value>,
) -> Result<AgentSettings, SettingsError> {
    let mut updated = settings.clone();
    for (field, value) in updates {
        let setter = SETTERS
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, setter)| *setter)
            .ok_or_else(|| SettingsError::UnknownField(field.clone()))?;
        setter(&mut updated, value).map_err(|reason| SettingsError::InvalidValue {
            field: field.clone(),
            reason,
        })?;
    }
    Ok(updated)
}
