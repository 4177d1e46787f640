//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. Every variant maps to a stable wire
//! `kind` so callers always receive a structured `{kind, message}` error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    /// Backend is not `ready`, its session is dead, or it has exhausted retries.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A backend (or inbound client) sent something that does not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response within the call timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Tool name is absent from the current registry.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Domain-level failure reported by the backend, forwarded verbatim.
    #[error("{message}")]
    ToolError {
        message: String,
        data: Option<Value>,
    },

    /// Registry file unreadable or violating its invariants.
    #[error("registry corrupt: {0}")]
    RegistryCorrupt(String),

    /// Two backends expose the same tool name.
    #[error("registry collision: tool '{tool}' exposed by both '{first}' and '{second}'")]
    RegistryCollision {
        tool: String,
        first: String,
        second: String,
    },

    /// Call arguments do not match the tool's parameter schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Malformed request or configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource (backend, method) not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, wire-visible error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BackendUnavailable,
    ProtocolError,
    Timeout,
    ToolNotFound,
    ToolError,
    RegistryCorrupt,
    RegistryCollision,
    InvalidArguments,
    InvalidRequest,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::ToolError => "tool_error",
            ErrorKind::RegistryCorrupt => "registry_corrupt",
            ErrorKind::RegistryCollision => "registry_collision",
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Wire classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Error::Protocol(_) => ErrorKind::ProtocolError,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ToolNotFound(_) => ErrorKind::ToolNotFound,
            Error::ToolError { .. } => ErrorKind::ToolError,
            Error::RegistryCorrupt(_) => ErrorKind::RegistryCorrupt,
            Error::RegistryCollision { .. } => ErrorKind::RegistryCollision,
            Error::InvalidArguments(_) => ErrorKind::InvalidArguments,
            Error::Validation(_) => ErrorKind::InvalidRequest,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Internal(_) | Error::Io(_) => ErrorKind::Internal,
            Error::Serialization(_) => ErrorKind::ProtocolError,
        }
    }

    /// Whether this outcome counts against the backend's health.
    ///
    /// A `ToolError` means the backend answered, so it is healthy even though
    /// the call failed.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable(_) | Error::Protocol(_) | Error::Timeout(_) | Error::Io(_)
        )
    }

    /// Structured `{kind, message, data?}` body used on every wire.
    pub fn to_wire(&self) -> Value {
        let mut body = serde_json::json!({
            "kind": self.kind().as_str(),
            "message": self.to_string(),
        });
        if let Error::ToolError { data: Some(data), .. } = self {
            body["data"] = data.clone();
        }
        body
    }
}

// Convenience constructors
impl Error {
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    pub fn tool_error(msg: impl Into<String>, data: Option<Value>) -> Self {
        Self::ToolError {
            message: msg.into(),
            data,
        }
    }

    pub fn registry_corrupt(msg: impl Into<String>) -> Self {
        Self::RegistryCorrupt(msg.into())
    }

    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
