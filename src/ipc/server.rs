//! TCP IPC server: accept loop and per-connection handler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::gateway::Gateway;
use crate::ipc::codec::{encode_json, read_frame, write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE};
use crate::ipc::router::route_request;
use crate::types::{Error, IpcConfig};

/// IPC server wrapping the gateway.
#[derive(Debug)]
pub struct IpcServer {
    gateway: Arc<Gateway>,
    addr: SocketAddr,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
}

impl IpcServer {
    pub fn new(gateway: Arc<Gateway>, addr: SocketAddr, ipc_config: IpcConfig) -> Self {
        Self {
            gateway,
            addr,
            cancel: CancellationToken::new(),
            ipc_config,
        }
    }

    /// Share an external cancellation token (e.g. the process-wide shutdown token).
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bind and run until cancelled or a fatal error occurs.
    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener).await
    }

    /// Run on an already-bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.ipc_config.max_connections));
        tracing::info!(
            addr = %listener.local_addr()?,
            max_connections = self.ipc_config.max_connections,
            "IPC server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("IPC server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = accept?;

                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                %peer,
                                max_connections = self.ipc_config.max_connections,
                                "connection rejected: at max_connections"
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    tracing::debug!(
                        %peer,
                        active = self.ipc_config.max_connections - conn_semaphore.available_permits(),
                        "IPC connection accepted"
                    );
                    let gateway = self.gateway.clone();
                    let cancel = self.cancel.clone();
                    let ipc_config = self.ipc_config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, gateway, cancel, ipc_config, permit).await {
                            tracing::warn!(%peer, error = %e, "connection error");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

fn error_payload(request_id: &str, error: &Error) -> serde_json::Value {
    serde_json::json!({
        "id": request_id,
        "ok": false,
        "error": error.to_wire(),
    })
}

/// Handle a single TCP connection: read frames → route → write responses.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    gateway: Arc<Gateway>,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let read_timeout = Duration::from_secs(ipc_config.read_timeout_secs);
    let write_timeout = Duration::from_secs(ipc_config.write_timeout_secs);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame_result = tokio::time::timeout(read_timeout, read_frame(&mut reader, ipc_config.max_frame_bytes)) => {
                let (msg_type, payload_bytes) = match frame_result {
                    Err(_elapsed) => {
                        tracing::debug!(read_timeout_secs = ipc_config.read_timeout_secs, "read timeout, dropping connection");
                        break;
                    }
                    Ok(result) => match result? {
                        Some(frame) => frame,
                        None => break, // clean EOF
                    },
                };

                if msg_type != MSG_REQUEST {
                    let err = Error::validation(format!("Unexpected message type: 0x{:02X}", msg_type));
                    let encoded = encode_json(&error_payload("", &err))?;
                    timed_write(&mut writer, MSG_ERROR, &encoded, write_timeout).await?;
                    continue;
                }

                let request: serde_json::Value = match serde_json::from_slice(&payload_bytes) {
                    Ok(v) => v,
                    Err(e) => {
                        let err = Error::validation(format!("Invalid JSON: {}", e));
                        let encoded = encode_json(&error_payload("", &err))?;
                        timed_write(&mut writer, MSG_ERROR, &encoded, write_timeout).await?;
                        continue;
                    }
                };

                let request_id = request.get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let method = request.get("method")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let params = request.get("params")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);

                tracing::debug!(id = %request_id, method, "IPC request");
                match route_request(&gateway, method, params).await {
                    Ok(result) => {
                        let response = serde_json::json!({
                            "id": request_id,
                            "ok": true,
                            "result": result,
                        });
                        let encoded = encode_json(&response)?;
                        timed_write(&mut writer, MSG_RESPONSE, &encoded, write_timeout).await?;
                    }
                    Err(e) => {
                        let encoded = encode_json(&error_payload(&request_id, &e))?;
                        timed_write(&mut writer, MSG_ERROR, &encoded, write_timeout).await?;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Write a frame with a timeout. Slow consumers lose the connection.
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, msg_type, payload))
        .await
        .map_err(|_| {
            tracing::warn!(write_timeout_secs = timeout.as_secs(), "write timeout, dropping connection");
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
