//! Shared fixtures: an in-memory backend speaking the line protocol.
//!
//! Tool behavior is picked by name prefix:
//! - `echo*` returns its args
//! - `fail*` answers with a tool error
//! - `slow*` answers after 200ms
//! - `crash*` closes the session
//! - anything else returns `{"tool": name}`

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tool_gateway::backend::protocol::{encode_line, method, Request, Response};
use tool_gateway::backend::{Backoff, Connector, ConnectorOptions, Launcher, Session, SessionConnector};
use tool_gateway::types::{BackendId, Config, LaunchSpec, Result};
use tool_gateway::{Error, Gateway};

#[derive(Debug, Default)]
pub struct FakeState {
    /// Advertised tool entries (`tools.list` payload items).
    pub tools: Vec<Value>,
    pub fail_listing: bool,
    /// Args of every `tools.call`, in arrival order.
    pub received: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct FakeBackend {
    pub id: BackendId,
    pub state: Arc<parking_lot::Mutex<FakeState>>,
    /// `tools.call` requests received.
    pub calls: Arc<AtomicUsize>,
    pub launches: Arc<AtomicUsize>,
    /// Launches to refuse before succeeding.
    pub refuse_launches: Arc<AtomicUsize>,
    /// Delay before each launch completes, in milliseconds.
    pub launch_delay_ms: Arc<AtomicU64>,
    /// Write a non-UTF-8 log line before every response.
    pub noisy: Arc<AtomicBool>,
}

impl FakeBackend {
    pub fn new(id: &str, tools: &[&str]) -> Self {
        let tools = tools
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "description": format!("{} tool", name),
                })
            })
            .collect();
        Self {
            id: BackendId::from_string(id.to_string()).unwrap(),
            state: Arc::new(parking_lot::Mutex::new(FakeState {
                tools,
                fail_listing: false,
                received: Vec::new(),
            })),
            calls: Arc::new(AtomicUsize::new(0)),
            launches: Arc::new(AtomicUsize::new(0)),
            refuse_launches: Arc::new(AtomicUsize::new(0)),
            launch_delay_ms: Arc::new(AtomicU64::new(0)),
            noisy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_tools(&self, tools: Vec<Value>) {
        self.state.lock().tools = tools;
    }

    pub fn received(&self) -> Vec<Value> {
        self.state.lock().received.clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, request: &Request) -> Option<Response> {
        let id = request.id.as_str();
        match request.method.as_str() {
            method::INITIALIZE => Some(Response::success(id, json!({"concurrent": false}))),
            method::PING => Some(Response::success(id, json!({}))),
            method::TOOLS_LIST => {
                let state = self.state.lock();
                if state.fail_listing {
                    Some(Response::failure(id, "internal", "listing unavailable"))
                } else {
                    Some(Response::success(id, json!({ "tools": state.tools.clone() })))
                }
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Launcher for FakeBackend {
    async fn launch(&self) -> Result<Session> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let delay = self.launch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self
            .refuse_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::backend_unavailable("launch refused"));
        }

        let (gateway_side, backend_side) = tokio::io::duplex(256 * 1024);
        let backend = self.clone();
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(backend_side);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(request) = serde_json::from_str::<Request>(&line) else {
                    continue;
                };
                let response = match backend.answer(&request) {
                    Some(response) => response,
                    None => {
                        backend.calls.fetch_add(1, Ordering::SeqCst);
                        backend
                            .state
                            .lock()
                            .received
                            .push(request.params["args"].clone());
                        let name = request.params["name"].as_str().unwrap_or("").to_string();
                        if name.starts_with("echo") {
                            Response::success(&request.id, request.params["args"].clone())
                        } else if name.starts_with("fail") {
                            Response::failure(&request.id, "tool_error", format!("{} failed", name))
                        } else if name.starts_with("slow") {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            Response::success(&request.id, json!("late"))
                        } else if name.starts_with("crash") {
                            return;
                        } else {
                            Response::success(&request.id, json!({ "tool": name }))
                        }
                    }
                };
                if backend.noisy.load(Ordering::SeqCst)
                    && write.write_all(b"log: caf\xe9 ready\n").await.is_err()
                {
                    return;
                }
                let out = encode_line(&response).unwrap();
                if write.write_all(out.as_bytes()).await.is_err() {
                    return;
                }
            }
        });

        let (read, write) = tokio::io::split(gateway_side);
        Ok(Session::new(self.id.clone(), read, write))
    }

    fn describe(&self) -> String {
        format!("fake {}", self.id)
    }
}

pub fn options() -> ConnectorOptions {
    ConnectorOptions {
        degrade_after: 3,
        fail_after: 3,
        handshake_timeout: Duration::from_secs(2),
        backoff: Backoff {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_retries: 2,
        },
        call_timeout: None,
        category: None,
    }
}

pub fn connector(backend: &FakeBackend) -> Arc<dyn Connector> {
    Arc::new(SessionConnector::new(
        backend.id.clone(),
        LaunchSpec::Tcp {
            addr: "in-memory".into(),
        },
        Arc::new(backend.clone()),
        options(),
    ))
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.dispatch.default_timeout = Duration::from_secs(2);
    config.health.ping_timeout = Duration::from_millis(500);
    config
}

/// Gateway over fake backends, persisting under `dir`.
pub fn gateway(backends: &[FakeBackend], dir: &Path) -> Gateway {
    gateway_with_config(backends, dir, &test_config())
}

pub fn gateway_with_config(backends: &[FakeBackend], dir: &Path, config: &Config) -> Gateway {
    let connectors = backends.iter().map(connector).collect();
    Gateway::new(connectors, dir.join("tool_registry.json"), config)
}

pub fn names(tools: &[tool_gateway::registry::ToolDefinition]) -> Vec<String> {
    tools.iter().map(|t| t.name.clone()).collect()
}
