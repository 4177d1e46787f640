//! Core types for the gateway.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (BackendId, RequestId)
//! - **Errors**: The gateway error taxonomy with thiserror derives
//! - **Config**: Configuration structures for backends, registry, health and IPC

mod config;
mod errors;
mod ids;

pub use config::{
    BackendConfig, BackoffConfig, Config, DispatchConfig, HealthConfig, InstrumentationConfig,
    IpcConfig, LaunchSpec, ObservabilityConfig, RegistryConfig, ServerConfig,
};
pub use errors::{Error, ErrorKind, Result};
pub use ids::{BackendId, RequestId};
