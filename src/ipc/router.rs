//! Top-level IPC router. Routes by method namespace and delegates to handlers.

use crate::gateway::Gateway;
use crate::ipc::handlers;
use crate::types::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Route one request to its handler.
pub async fn route_request(gateway: &Gateway, method: &str, params: Value) -> Result<Value> {
    match method.split_once('.') {
        Some(("tools", op)) => handlers::tools::handle(gateway, op, params).await,
        Some(("health", _)) | Some(("gateway", _)) | Some(("backend", _)) => {
            handlers::gateway::handle(gateway, method, params).await
        }
        _ => Err(Error::not_found(format!("Unknown method: {}", method))),
    }
}

// =============================================================================
// Shared helpers, used by all handler modules
// =============================================================================

pub fn str_field(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::validation(format!("Missing required field: {}", key)))
}

pub fn opt_str_field(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Deserialize params into a typed request; `null` counts as `{}`.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| Error::validation(format!("Invalid params: {}", e)))
}

pub fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::internal(format!("Serialization error: {}", e)))
}
