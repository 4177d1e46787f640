//! Backend connectivity.
//!
//! - **protocol**: the newline-delimited JSON request/response protocol
//! - **session**: launching backends (child process or TCP) and the line stream
//! - **backoff**: start retry delays
//! - **connector**: the per-backend `Connector` with its worker task and status

pub mod backoff;
pub mod connector;
pub mod protocol;
pub mod session;

pub use backoff::Backoff;
pub use connector::{BackendDescriptor, Connector, ConnectorOptions, SessionConnector};
pub use session::{launcher_for, Launcher, ProcessLauncher, Session, TcpLauncher};
