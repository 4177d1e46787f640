//! Backend line protocol.
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! → {"id": "...", "method": "tools.call", "params": {"name": "...", "args": {...}}}
//! ← {"id": "...", "result": ...}
//! ← {"id": "...", "error": {"kind": "...", "message": "...", "data": ...}}
//! ```
//!
//! Lines that do not parse as a response (backend log output, blank lines)
//! are skipped by the reader.

use crate::types::{Error, RequestId, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Methods the gateway sends to backends.
pub mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const TOOLS_LIST: &str = "tools.list";
    pub const TOOLS_CALL: &str = "tools.call";
    pub const PING: &str = "ping";
}

/// Gateway → backend request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// New request with a fresh id.
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            id: RequestId::new().to_string(),
            method: method.to_string(),
            params,
        }
    }

    /// `tools.call` request.
    pub fn call(name: &str, args: Value) -> Self {
        Self::new(
            method::TOOLS_CALL,
            serde_json::json!({ "name": name, "args": args }),
        )
    }
}

/// Error object inside a failure response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Backend → gateway response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result,
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, kind: &str, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Value::Null,
            error: Some(WireError {
                kind: kind.to_string(),
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Result value, or the backend's error forwarded verbatim as `ToolError`.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(Error::tool_error(err.message, err.data)),
            None => Ok(self.result),
        }
    }
}

/// Serialize one message as a newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse a line as a response; `None` for anything else.
pub fn parse_response(line: &str) -> Option<Response> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Extract the tool list from a `tools.list` result: `{"tools": [...]}` or a bare array.
pub fn tool_list_payload(result: Value) -> Result<Vec<Value>> {
    match result {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("tools") {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(Error::protocol(format!(
                "tools.list: 'tools' must be an array, got {}",
                other
            ))),
            None => Err(Error::protocol("tools.list: result has no 'tools' field")),
        },
        other => Err(Error::protocol(format!(
            "tools.list: unexpected result {}",
            other
        ))),
    }
}
