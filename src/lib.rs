//! # Tool Gateway - Tool Registry Gateway
//!
//! Aggregates the tool catalogs of several backend processes into one
//! registry and proxies tool calls to the backend that owns each tool:
//! - Per-backend connectors with a handshake, status machine and startup backoff
//! - A collision-checked registry, rebuilt wholesale and persisted atomically
//! - Dispatch with per-call timeouts, argument checks and ordered batches
//! - Slow-call instrumentation and per-tool rolling stats
//! - Periodic health checks with registry self-repair
//! - A length-prefixed JSON IPC server for callers
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────────────────┐
//!   IPC requests  →  │               Gateway                │
//!                    │  ┌──────────────┐ ┌───────────────┐  │
//!                    │  │ RegistryStore│ │Instrumentation│  │
//!                    │  │  (ArcSwap)   │ │  (ToolStats)  │  │
//!                    │  └──────────────┘ └───────────────┘  │
//!                    │  ┌─────────┐ ┌─────────┐ ┌─────────┐ │
//!                    │  │Connector│ │Connector│ │Connector│ │
//!                    │  └────┬────┘ └────┬────┘ └────┬────┘ │
//!                    └───────┼───────────┼───────────┼──────┘
//!                         worker      worker      worker
//!                            │           │           │
//!                        backend A   backend B   backend C
//! ```
//!
//! Each connector owns its backend session inside a worker task; the
//! registry is an immutable snapshot swapped in whole after every rebuild.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod backend;
pub mod gateway;
pub mod health;
pub mod instrumentation;
pub mod ipc;
pub mod registry;
pub mod types;

// Internal utilities
pub mod observability;

pub use gateway::Gateway;
pub use types::{Config, Error, Result};
