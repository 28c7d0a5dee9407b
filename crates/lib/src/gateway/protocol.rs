//! Backend wire protocol: request/response shapes and lenient payload parsing.
//!
//! Endpoints (JSON over HTTP):
//! - `GET /get_chats` -> `[Session]`
//! - `GET /models` -> `[string]`
//! - `POST /generate` `{prompt, model}` -> `{response}` | `{error}`
//! - `POST /save_chat` full session -> ack
//! - `DELETE /delete_chat/{id}` -> ack
//! - `GET /system_stats` -> `{global:{cpu, ram_pct, ram_gb}, app:{cpu, ram_gb}}`

use super::GatewayError;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PATH_SESSIONS: &str = "/get_chats";
pub const PATH_MODELS: &str = "/models";
pub const PATH_GENERATE: &str = "/generate";
pub const PATH_SAVE: &str = "/save_chat";
pub const PATH_DELETE: &str = "/delete_chat";
pub const PATH_STATS: &str = "/system_stats";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub model: String,
}

/// Host-wide usage from `/system_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub ram_pct: f64,
    /// Preformatted "used/total GB".
    #[serde(default)]
    pub ram_gb: String,
}

/// Usage of the backend process itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppStats {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub ram_gb: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub global: GlobalStats,
    #[serde(default)]
    pub app: AppStats,
}

/// Sessions from `/get_chats`. A non-array payload is malformed; array entries
/// that are not sessions are skipped.
pub fn parse_sessions(value: Value) -> Result<Vec<Session>, GatewayError> {
    let Value::Array(items) = value else {
        return Err(GatewayError::Malformed(format!(
            "expected session array, got {}",
            kind(&value)
        )));
    };
    let mut sessions = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<Session>(item) {
            Ok(s) => sessions.push(s),
            Err(e) => log::warn!("skipping malformed session entry: {}", e),
        }
    }
    Ok(sessions)
}

/// Model ids from `/models`; non-string entries are skipped.
pub fn parse_models(value: Value) -> Result<Vec<String>, GatewayError> {
    let Value::Array(items) = value else {
        return Err(GatewayError::Malformed(format!(
            "expected model array, got {}",
            kind(&value)
        )));
    };
    Ok(items
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect())
}

/// Reply text from `/generate`. `{error}` is an api error; a missing or empty
/// `response` is malformed.
pub fn parse_generate(value: Value) -> Result<String, GatewayError> {
    match value.get("response") {
        Some(Value::String(s)) if !s.is_empty() => return Ok(s.clone()),
        _ => {}
    }
    if let Some(err) = value.get("error") {
        let msg = err
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(GatewayError::Api(msg));
    }
    Err(GatewayError::Malformed("generate response has no text".to_string()))
}

/// Stats from `/system_stats`; `global` is required.
pub fn parse_system_stats(value: Value) -> Result<SystemStats, GatewayError> {
    if value.get("global").map_or(true, Value::is_null) {
        return Err(GatewayError::Malformed("system stats without global".to_string()));
    }
    serde_json::from_value(value).map_err(|e| GatewayError::Malformed(e.to_string()))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
