//! TCP + JSON IPC transport layer.
//!
//! Length-prefixed JSON framing; one request frame in, one response or
//! error frame out, in order, per connection.

pub mod codec;
pub mod handlers;
pub mod router;
pub mod server;

pub use server::IpcServer;
