//! Backend connectors.
//!
//! A [`SessionConnector`] owns one backend. After a successful handshake it
//! spawns a worker task that owns the [`Session`]; callers submit jobs over an
//! mpsc queue and wait on a oneshot reply, so requests to one backend are
//! serialized and every reply is correlated by request id.
//!
//! Each job carries a deadline. A job whose deadline passes while waiting for
//! its response is abandoned: the caller gets `Timeout`, and the late response
//! is discarded by id when the worker reads past it.

use crate::backend::backoff::Backoff;
use crate::backend::protocol::{method, tool_list_payload, Request, Response};
use crate::backend::session::{launcher_for, Launcher, Session};
use crate::health::{BackendHealth, BackendStatus, StartTrigger, Transition};
use crate::registry::{AdvertisedTool, ToolDefinition};
use crate::types::{BackendConfig, BackendId, Config, Error, LaunchSpec, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Jobs buffered per backend before submitters wait.
const QUEUE_DEPTH: usize = 64;

/// Snapshot of one backend's identity and health.
#[derive(Debug, Clone, Serialize)]
pub struct BackendDescriptor {
    pub id: BackendId,
    #[serde(skip)]
    pub launch_spec: LaunchSpec,
    pub transport: String,
    pub status: BackendStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One backend as seen by the registry and the dispatcher.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    fn id(&self) -> &BackendId;

    fn status(&self) -> BackendStatus;

    fn descriptor(&self) -> BackendDescriptor;

    /// Backend-specific call timeout, if configured.
    fn call_timeout(&self) -> Option<Duration>;

    /// Launch and handshake, retrying with backoff. Only valid from `unstarted`.
    async fn start(&self) -> Result<()>;

    /// Current tool list, with ownership attached.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Invoke a tool. Backend-reported failures come back as `ToolError`.
    async fn call(&self, tool: &str, args: Value, timeout: Duration) -> Result<Value>;

    /// Round-trip a no-op request; returns the latency.
    async fn ping(&self, timeout: Duration) -> Result<Duration>;

    /// Operator restart: tear down any session and start again.
    async fn restart(&self) -> Result<()>;

    async fn shutdown(&self);
}

/// Tunables for a [`SessionConnector`].
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    pub degrade_after: u32,
    pub fail_after: u32,
    pub handshake_timeout: Duration,
    pub backoff: Backoff,
    pub call_timeout: Option<Duration>,
    pub category: Option<String>,
}

impl ConnectorOptions {
    pub fn from_config(backend: &BackendConfig, config: &Config) -> Self {
        Self {
            degrade_after: config.health.degrade_after,
            fail_after: config.health.fail_after,
            handshake_timeout: config.health.handshake_timeout,
            backoff: Backoff::from(&config.backoff),
            call_timeout: backend.call_timeout,
            category: backend.category.clone(),
        }
    }
}

struct Job {
    request: Request,
    deadline: Instant,
    reply: oneshot::Sender<Result<Response>>,
}

struct WorkerHandle {
    sender: mpsc::Sender<Job>,
    cancel: CancellationToken,
    generation: u64,
    task: JoinHandle<()>,
}

/// State shared between the connector and its worker task.
struct Inner {
    id: BackendId,
    health: Mutex<BackendHealth>,
    worker: Mutex<Option<WorkerHandle>>,
    generation: AtomicU64,
}

impl Inner {
    fn log_transition(&self, transition: Option<Transition>, reason: Option<&str>) {
        let Some(t) = transition else { return };
        match t.to {
            BackendStatus::Degraded | BackendStatus::Failed => tracing::warn!(
                backend = %self.id,
                from = %t.from,
                to = %t.to,
                reason = reason.unwrap_or(""),
                "backend status changed"
            ),
            _ => tracing::info!(
                backend = %self.id,
                from = %t.from,
                to = %t.to,
                "backend status changed"
            ),
        }
    }

    fn record_success(&self) {
        let transition = self.health.lock().record_success();
        self.log_transition(transition, None);
    }

    fn record_failure(&self, error: &Error) {
        let reason = error.to_string();
        let transition = self.health.lock().record_failure(&reason);
        self.log_transition(transition, Some(&reason));
        if matches!(transition, Some(t) if t.to == BackendStatus::Failed) {
            self.stop_worker();
        }
    }

    /// Session loss reported by the worker of `generation`, before it replies.
    fn record_disconnect(&self, generation: u64, reason: &str) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let transition = self.health.lock().record_disconnect(reason);
        self.log_transition(transition, Some(reason));
        let mut worker = self.worker.lock();
        if worker.as_ref().map(|w| w.generation) == Some(generation) {
            worker.take();
        }
    }

    fn take_worker(&self) -> Option<WorkerHandle> {
        let worker = self.worker.lock().take();
        if let Some(w) = &worker {
            w.cancel.cancel();
        }
        worker
    }

    fn stop_worker(&self) {
        self.take_worker();
    }

    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        self.worker.lock().as_ref().map(|w| w.sender.clone())
    }
}

/// Connector over a launched [`Session`].
pub struct SessionConnector {
    inner: Arc<Inner>,
    launch_spec: LaunchSpec,
    launcher: Arc<dyn Launcher>,
    options: ConnectorOptions,
    start_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl fmt::Debug for SessionConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConnector")
            .field("id", &self.inner.id)
            .field("launcher", &self.launcher)
            .field("status", &self.status())
            .finish()
    }
}

impl SessionConnector {
    pub fn new(
        id: BackendId,
        launch_spec: LaunchSpec,
        launcher: Arc<dyn Launcher>,
        options: ConnectorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                health: Mutex::new(BackendHealth::new(options.degrade_after, options.fail_after)),
                worker: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
            launch_spec,
            launcher,
            options,
            start_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Connector for a configured backend, using the launcher its spec names.
    pub fn from_config(backend: &BackendConfig, config: &Config) -> Self {
        Self::new(
            backend.id.clone(),
            backend.launch.clone(),
            launcher_for(&backend.id, &backend.launch),
            ConnectorOptions::from_config(backend, config),
        )
    }

    fn unavailable(&self, reason: impl fmt::Display) -> Error {
        Error::backend_unavailable(format!("backend {}: {}", self.inner.id, reason))
    }

    /// Caller must hold `start_lock` and have moved the status to `starting`.
    async fn start_with_retries(&self) -> Result<()> {
        let mut retries = 0u32;
        loop {
            let error = match self.attempt_start().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let reason = error.to_string();
            let transition = self.inner.health.lock().handshake_failed(&reason);
            self.inner.log_transition(transition, Some(&reason));

            if !self.options.backoff.allows(retries) {
                tracing::error!(
                    backend = %self.inner.id,
                    attempts = retries + 1,
                    error = %error,
                    "backend failed to start; operator restart required"
                );
                return Err(self.unavailable(format!(
                    "failed to start after {} attempts: {}",
                    retries + 1,
                    reason
                )));
            }

            retries += 1;
            let delay = self.options.backoff.delay(retries);
            tracing::warn!(
                backend = %self.inner.id,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "backend start failed; retrying"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(self.unavailable("shutting down")),
                _ = tokio::time::sleep(delay) => {}
            }

            let transition = self.inner.health.lock().begin_start(StartTrigger::Retry)?;
            self.inner.log_transition(Some(transition), None);
        }
    }

    async fn attempt_start(&self) -> Result<()> {
        let mut session = self.launcher.launch().await?;
        let handshake = Request::new(
            method::INITIALIZE,
            json!({ "client": "tool-gateway", "version": env!("CARGO_PKG_VERSION") }),
        );

        let exchanged =
            tokio::time::timeout(self.options.handshake_timeout, session.round_trip(&handshake)).await;
        let response = match exchanged {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                session.close().await;
                return Err(e);
            }
            Err(_) => {
                session.close().await;
                return Err(Error::timeout(format!(
                    "backend {}: no handshake within {:?}",
                    self.inner.id, self.options.handshake_timeout
                )));
            }
        };

        let info = match response.into_result() {
            Ok(info) => info,
            Err(e) => {
                session.close().await;
                return Err(Error::protocol(format!(
                    "backend {} rejected handshake: {}",
                    self.inner.id, e
                )));
            }
        };
        let concurrent = info
            .get("concurrent")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        self.install_worker(session);
        let transition = self.inner.health.lock().handshake_succeeded();
        self.inner.log_transition(transition, None);
        tracing::info!(
            backend = %self.inner.id,
            transport = %self.launcher.describe(),
            concurrent,
            "backend ready"
        );
        Ok(())
    }

    fn install_worker(&self, session: Session) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(run_worker(
            self.inner.clone(),
            generation,
            session,
            receiver,
            cancel.clone(),
        ));
        let previous = self.inner.worker.lock().replace(WorkerHandle {
            sender,
            cancel,
            generation,
            task,
        });
        if let Some(old) = previous {
            old.cancel.cancel();
        }
    }

    /// Queue a request for the worker and wait for its response.
    async fn submit(&self, request: Request, timeout: Duration) -> Result<Response> {
        let status = self.status();
        if !status.accepts_calls() {
            return Err(self.unavailable(format!("status is {}", status)));
        }
        let sender = self
            .inner
            .sender()
            .ok_or_else(|| self.unavailable("no active session"))?;

        let deadline = Instant::now() + timeout;
        let method = request.method.clone();
        let (reply, response) = oneshot::channel();
        let exchange = async {
            sender
                .send(Job {
                    request,
                    deadline,
                    reply,
                })
                .await
                .map_err(|_| self.unavailable("session closed"))?;
            match response.await {
                Ok(outcome) => outcome,
                Err(_) => Err(self.unavailable("session closed")),
            }
        };

        let outcome = match tokio::time::timeout_at(deadline, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::timeout(format!(
                "backend {}: no response to {} within {:?}",
                self.inner.id, method, timeout
            ))),
        };

        match &outcome {
            Ok(_) => self.inner.record_success(),
            Err(e @ Error::Timeout(_)) => self.inner.record_failure(e),
            // Disconnects are recorded by the worker that saw them.
            Err(_) => {}
        }
        outcome
    }

    fn parse_listing(&self, response: Response) -> Result<Vec<ToolDefinition>> {
        let result = response
            .into_result()
            .map_err(|e| Error::protocol(format!("backend {}: tools.list failed: {}", self.inner.id, e)))?;

        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for item in tool_list_payload(result)? {
            let advertised: AdvertisedTool = serde_json::from_value(item).map_err(|e| {
                Error::protocol(format!("backend {}: malformed tool: {}", self.inner.id, e))
            })?;
            let tool = advertised.into_definition(&self.inner.id, self.options.category.as_deref());
            tool.check()
                .map_err(|e| Error::protocol(format!("backend {}: {}", self.inner.id, e)))?;
            if !seen.insert(tool.name.clone()) {
                return Err(Error::protocol(format!(
                    "backend {} listed tool '{}' twice",
                    self.inner.id, tool.name
                )));
            }
            tools.push(tool);
        }
        Ok(tools)
    }
}

#[async_trait]
impl Connector for SessionConnector {
    fn id(&self) -> &BackendId {
        &self.inner.id
    }

    fn status(&self) -> BackendStatus {
        self.inner.health.lock().status()
    }

    fn descriptor(&self) -> BackendDescriptor {
        let health = self.inner.health.lock();
        BackendDescriptor {
            id: self.inner.id.clone(),
            launch_spec: self.launch_spec.clone(),
            transport: self.launcher.describe(),
            status: health.status(),
            last_seen_at: health.last_seen_at(),
            consecutive_failures: health.consecutive_failures(),
            last_error: health.last_error().map(str::to_string),
        }
    }

    fn call_timeout(&self) -> Option<Duration> {
        self.options.call_timeout
    }

    async fn start(&self) -> Result<()> {
        let _starting = self.start_lock.lock().await;
        let transition = self.inner.health.lock().begin_start(StartTrigger::Initial)?;
        self.inner.log_transition(Some(transition), None);
        self.start_with_retries().await
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let response = self
            .submit(
                Request::new(method::TOOLS_LIST, json!({})),
                self.options.handshake_timeout,
            )
            .await?;
        let parsed = self.parse_listing(response);
        if let Err(e) = &parsed {
            self.inner.record_failure(e);
        }
        parsed
    }

    async fn call(&self, tool: &str, args: Value, timeout: Duration) -> Result<Value> {
        self.submit(Request::call(tool, args), timeout)
            .await?
            .into_result()
    }

    async fn ping(&self, timeout: Duration) -> Result<Duration> {
        let started = Instant::now();
        // Any answer, even an error object, proves the session is alive.
        self.submit(Request::new(method::PING, json!({})), timeout)
            .await?;
        Ok(started.elapsed())
    }

    async fn restart(&self) -> Result<()> {
        let _starting = self
            .start_lock
            .try_lock()
            .map_err(|_| Error::validation(format!("backend {} is already starting", self.inner.id)))?;

        if let Some(old) = self.inner.take_worker() {
            let _ = old.task.await;
        }
        let transition = self.inner.health.lock().begin_start(StartTrigger::Operator)?;
        self.inner.log_transition(Some(transition), Some("operator restart"));
        self.start_with_retries().await
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(worker) = self.inner.take_worker() {
            let _ = worker.task.await;
        }
        tracing::debug!(backend = %self.inner.id, "backend connector stopped");
    }
}

/// Worker loop: owns the session and answers queued jobs one at a time.
async fn run_worker(
    inner: Arc<Inner>,
    generation: u64,
    mut session: Session,
    mut jobs: mpsc::Receiver<Job>,
    cancel: CancellationToken,
) {
    let mut lost: Option<String> = None;

    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if job.reply.is_closed() {
            tracing::trace!(backend = %inner.id, "caller gone; skipping queued request");
            continue;
        }
        if Instant::now() >= job.deadline {
            let _ = job.reply.send(Err(Error::timeout(format!(
                "backend {}: request expired in queue",
                inner.id
            ))));
            continue;
        }

        // A write cut short leaves a partial line on the stream, so it ends the session.
        let sent = match tokio::time::timeout_at(job.deadline, session.send(&job.request)).await {
            Ok(sent) => sent,
            Err(_) => Err(Error::backend_unavailable(format!(
                "backend {}: write stalled",
                inner.id
            ))),
        };
        if let Err(e) = sent {
            let reason = e.to_string();
            inner.record_disconnect(generation, &reason);
            lost = Some(reason);
            let _ = job.reply.send(Err(e));
            break;
        }

        let received = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = job.reply.send(Err(Error::backend_unavailable(format!(
                    "backend {}: session stopped",
                    inner.id
                ))));
                break;
            }
            received = tokio::time::timeout_at(job.deadline, session.receive(&job.request.id)) => received,
        };

        match received {
            Ok(Ok(response)) => {
                let _ = job.reply.send(Ok(response));
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                inner.record_disconnect(generation, &reason);
                lost = Some(reason);
                let _ = job.reply.send(Err(e));
                break;
            }
            Err(_) => {
                tracing::debug!(
                    backend = %inner.id,
                    id = %job.request.id,
                    method = %job.request.method,
                    "request abandoned at deadline"
                );
                let _ = job.reply.send(Err(Error::timeout(format!(
                    "backend {}: no response to {}",
                    inner.id, job.request.method
                ))));
            }
        }
    }

    let reason = lost.unwrap_or_else(|| format!("backend {}: session stopped", inner.id));
    jobs.close();
    while let Ok(job) = jobs.try_recv() {
        let _ = job.reply.send(Err(Error::backend_unavailable(reason.clone())));
    }
    session.close().await;
}
