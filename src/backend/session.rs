//! Backend sessions: a launched backend and the line stream to it.
//!
//! A [`Launcher`] produces a fresh [`Session`] per start attempt. Child
//! processes speak over stdin/stdout; their stderr is forwarded to tracing.
//! TCP backends are assumed to be running already.

use crate::backend::protocol::{encode_line, parse_response, Request, Response};
use crate::types::{BackendId, Error, LaunchSpec, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

/// Longest response line accepted from a backend.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Live line stream to one backend.
pub struct Session {
    backend: BackendId,
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    child: Option<Child>,
    /// Bytes of the line being read; kept across cancelled reads.
    line: Vec<u8>,
    max_line_bytes: usize,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend)
            .field("child_pid", &self.child.as_ref().and_then(|c| c.id()))
            .finish()
    }
}

impl Session {
    pub fn new<R, W>(backend: BackendId, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            backend,
            reader: Box::new(BufReader::new(reader)),
            writer: Box::new(writer),
            child: None,
            line: Vec::new(),
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    /// Override the response line cap.
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    /// Attach the child process so closing the session reaps it.
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    pub fn backend(&self) -> &BackendId {
        &self.backend
    }

    /// Write one request line. Any error means the session is unusable.
    pub async fn send(&mut self, request: &Request) -> Result<()> {
        let line = encode_line(request)?;
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.disconnected(format!("write failed: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| self.disconnected(format!("flush failed: {}", e)))
    }

    /// Read lines until the response with `id` arrives.
    ///
    /// Non-response lines (including ones that are not UTF-8) and responses
    /// to abandoned requests are skipped. EOF, a read error or a line over
    /// the cap ([`MAX_LINE_BYTES`] by default) is `BackendUnavailable`.
    pub async fn receive(&mut self, id: &str) -> Result<Response> {
        loop {
            if !self.fill_line().await? {
                return Err(self.disconnected("output closed (process may have exited)"));
            }

            let parsed = {
                let text = String::from_utf8_lossy(&self.line);
                let parsed = parse_response(&text);
                if parsed.is_none() {
                    tracing::trace!(
                        backend = %self.backend,
                        line = %text.trim_end(),
                        "skipping non-response line"
                    );
                }
                parsed
            };
            self.line.clear();

            match parsed {
                Some(response) if response.id == id => return Ok(response),
                Some(stale) => {
                    tracing::debug!(
                        backend = %self.backend,
                        id = %stale.id,
                        "discarding response to abandoned request"
                    );
                }
                None => {}
            }
        }
    }

    /// Buffer bytes up to and including the next newline into `self.line`.
    ///
    /// Returns `false` on EOF. Consumed bytes are kept in `self.line`, so a
    /// read cut short by a deadline resumes where it stopped.
    async fn fill_line(&mut self) -> Result<bool> {
        loop {
            let available = match self.reader.fill_buf().await {
                Ok(buf) => buf,
                Err(e) => {
                    return Err(Error::backend_unavailable(format!(
                        "backend {}: read failed: {}",
                        self.backend, e
                    )))
                }
            };
            if available.is_empty() {
                return Ok(false);
            }

            let (taken, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            };
            self.line.extend_from_slice(&available[..taken]);
            self.reader.consume(taken);

            if self.line.len() > self.max_line_bytes {
                let len = self.line.len();
                self.line.clear();
                return Err(self.disconnected(format!(
                    "response line exceeds {} bytes (read {} so far)",
                    self.max_line_bytes, len
                )));
            }
            if complete {
                return Ok(true);
            }
        }
    }

    /// Send a request and wait for its response.
    pub async fn round_trip(&mut self, request: &Request) -> Result<Response> {
        self.send(request).await?;
        self.receive(&request.id).await
    }

    /// Close the write half and stop the child process.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(backend = %self.backend, error = %e, "backend process already gone");
            }
        }
    }

    fn disconnected(&self, reason: impl fmt::Display) -> Error {
        Error::backend_unavailable(format!("backend {}: {}", self.backend, reason))
    }
}

/// Produces sessions for one backend.
#[async_trait]
pub trait Launcher: Send + Sync + fmt::Debug {
    async fn launch(&self) -> Result<Session>;

    /// Short human description for logs ("process python3", "tcp 127.0.0.1:7001").
    fn describe(&self) -> String;
}

/// Spawns the backend as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    backend: BackendId,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self) -> Result<Session> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::backend_unavailable(format!(
                "backend {}: failed to spawn '{}': {}",
                self.backend, self.command, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::internal("child stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("child stdout not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            let backend = self.backend.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).split(b'\n');
                while let Ok(Some(line)) = lines.next_segment().await {
                    tracing::debug!(backend = %backend, "{}", String::from_utf8_lossy(&line).trim_end());
                }
            });
        }

        tracing::debug!(
            backend = %self.backend,
            pid = ?child.id(),
            command = %self.command,
            "backend process spawned"
        );
        Ok(Session::new(self.backend.clone(), stdout, stdin).with_child(child))
    }

    fn describe(&self) -> String {
        format!("process {}", self.command)
    }
}

/// Connects to an already-running backend over TCP.
#[derive(Debug, Clone)]
pub struct TcpLauncher {
    backend: BackendId,
    addr: String,
}

#[async_trait]
impl Launcher for TcpLauncher {
    async fn launch(&self) -> Result<Session> {
        let stream = tokio::net::TcpStream::connect(&self.addr).await.map_err(|e| {
            Error::backend_unavailable(format!(
                "backend {}: cannot connect to {}: {}",
                self.backend, self.addr, e
            ))
        })?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok(Session::new(self.backend.clone(), read, write))
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.addr)
    }
}

/// Launcher for a configured launch spec.
pub fn launcher_for(backend: &BackendId, spec: &LaunchSpec) -> Arc<dyn Launcher> {
    match spec {
        LaunchSpec::Process {
            command,
            args,
            env,
            cwd,
        } => Arc::new(ProcessLauncher {
            backend: backend.clone(),
            command: command.clone(),
            args: args.clone(),
            env: env.clone(),
            cwd: cwd.clone(),
        }),
        LaunchSpec::Tcp { addr } => Arc::new(TcpLauncher {
            backend: backend.clone(),
            addr: addr.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::protocol::method;
    use serde_json::json;
    use tokio::io::duplex;

    fn backend() -> BackendId {
        BackendId::from_string("echo".into()).unwrap()
    }

    #[tokio::test]
    async fn test_receive_skips_noise_and_stale_ids() {
        let (gateway_side, backend_side) = duplex(4096);
        let (gw_read, gw_write) = tokio::io::split(gateway_side);
        let (mut be_read, mut be_write) = tokio::io::split(backend_side);
        let mut session = Session::new(backend(), gw_read, gw_write);

        let request = Request::new(method::PING, json!({}));
        let id = request.id.clone();
        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut be_read, &mut buf).await.unwrap();
            be_write.write_all(b"log: warming up\n").await.unwrap();
            be_write
                .write_all(b"{\"id\": \"stale\", \"result\": 1}\n")
                .await
                .unwrap();
            let line = encode_line(&Response::success(id, json!("pong"))).unwrap();
            be_write.write_all(line.as_bytes()).await.unwrap();
        });

        let response = session.round_trip(&request).await.unwrap();
        assert_eq!(response.result, json!("pong"));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_skips_non_utf8_noise() {
        let (gateway_side, backend_side) = duplex(4096);
        let (gw_read, gw_write) = tokio::io::split(gateway_side);
        let (_be_read, mut be_write) = tokio::io::split(backend_side);
        let mut session = Session::new(backend(), gw_read, gw_write);

        be_write.write_all(b"log: caf\xe9 ready\n").await.unwrap();
        let line = encode_line(&Response::success("call-1", json!({"ok": true}))).unwrap();
        be_write.write_all(line.as_bytes()).await.unwrap();

        let response = session.receive("call-1").await.unwrap();
        assert_eq!(response.result, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_oversized_line_aborts_before_newline() {
        let (gateway_side, backend_side) = duplex(64 * 1024);
        let (gw_read, gw_write) = tokio::io::split(gateway_side);
        let (_be_read, mut be_write) = tokio::io::split(backend_side);
        let mut session = Session::new(backend(), gw_read, gw_write).with_max_line_bytes(1024);

        // No newline ever arrives; the writer stays open.
        be_write.write_all(&vec![b'x'; 4096]).await.unwrap();

        let err = tokio::time::timeout(std::time::Duration::from_secs(1), session.receive("1"))
            .await
            .expect("cap should trip without waiting for a newline")
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
        assert!(err.to_string().contains("exceeds 1024 bytes"));
        assert!(session.line.is_empty());
    }

    #[tokio::test]
    async fn test_partial_line_survives_cancelled_receive() {
        let (gateway_side, backend_side) = duplex(4096);
        let (gw_read, gw_write) = tokio::io::split(gateway_side);
        let (_be_read, mut be_write) = tokio::io::split(backend_side);
        let mut session = Session::new(backend(), gw_read, gw_write);

        let line = encode_line(&Response::success("call-2", json!(2))).unwrap();
        let (head, tail) = line.split_at(10);
        be_write.write_all(head.as_bytes()).await.unwrap();
        let cut = tokio::time::timeout(std::time::Duration::from_millis(50), session.receive("call-2")).await;
        assert!(cut.is_err());

        be_write.write_all(tail.as_bytes()).await.unwrap();
        let response = session.receive("call-2").await.unwrap();
        assert_eq!(response.result, json!(2));
    }

    #[tokio::test]
    async fn test_eof_is_backend_unavailable() {
        let (gateway_side, backend_side) = duplex(1024);
        let (gw_read, gw_write) = tokio::io::split(gateway_side);
        let mut session = Session::new(backend(), gw_read, gw_write);
        drop(backend_side);

        let err = session.receive("1").await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
        assert!(err.to_string().contains("output closed"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_backend_unavailable() {
        let spec = LaunchSpec::Process {
            command: "/nonexistent/tool-gateway-backend".into(),
            args: vec![],
            env: BTreeMap::new(),
            cwd: None,
        };
        let launcher = launcher_for(&backend(), &spec);
        assert_eq!(launcher.describe(), "process /nonexistent/tool-gateway-backend");
        let err = launcher.launch().await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }
}
