//! Gateway: the single entry point callers use.
//!
//! The gateway resolves tool names against the live registry snapshot and
//! forwards calls through the owning backend's connector, wrapped by
//! instrumentation. It holds no lock of its own: the registry is
//! snapshot-replace and each connector serializes its own backend.
//!
//! ```text
//!   caller → Gateway::call_tool
//!              │ registry snapshot: name → owner_id
//!              │ validate args against parameter_schema
//!              ▼
//!            Instrumentation::instrument
//!              ▼
//!            Connector::call ── queue ──► worker ──► backend session
//! ```

pub mod batch;
pub mod catalog;

pub use batch::{BatchCall, BatchItem, BatchOutcome};
pub use catalog::{SearchHit, ToolFilter};

use crate::backend::{BackendDescriptor, Connector, SessionConnector};
use crate::health::{BackendReport, BackendStatus, HealthReport, RegistryReport};
use crate::instrumentation::{Instrumentation, ToolStatsReport};
use crate::registry::{LoadSource, RegistryStore, ToolDefinition};
use crate::types::{BackendId, Config, DispatchConfig, Error, HealthConfig, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of [`Gateway::reload`].
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub previous: usize,
    pub current: usize,
    pub generated_at: DateTime<Utc>,
}

/// Outcome of [`Gateway::start`].
#[derive(Debug, Clone, Serialize)]
pub struct StartupSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_source: Option<LoadSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_error: Option<String>,
    pub ready: Vec<BackendId>,
    pub failed: Vec<BackendId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reload_error: Option<String>,
    pub total_tools: usize,
}

/// Point-in-time gateway overview.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub version: &'static str,
    pub total_tools: usize,
    pub live_tools: usize,
    pub backends: usize,
    pub backends_by_status: BTreeMap<BackendStatus, usize>,
    pub registry_path: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub schema_version: u32,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Tool registry gateway.
#[derive(Debug)]
pub struct Gateway {
    /// Connectors in configuration order (registry merge order).
    connectors: Vec<Arc<dyn Connector>>,
    by_id: HashMap<BackendId, Arc<dyn Connector>>,
    store: RegistryStore,
    instrumentation: Instrumentation,
    dispatch: DispatchConfig,
    health: HealthConfig,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Gateway {
    pub fn new(connectors: Vec<Arc<dyn Connector>>, registry_path: PathBuf, config: &Config) -> Self {
        let by_id: HashMap<BackendId, Arc<dyn Connector>> = connectors
            .iter()
            .map(|c| (c.id().clone(), c.clone()))
            .collect();
        let known: HashSet<BackendId> = by_id.keys().cloned().collect();
        Self {
            connectors,
            by_id,
            store: RegistryStore::new(registry_path, known),
            instrumentation: Instrumentation::new(config.instrumentation.clone()),
            dispatch: config.dispatch.clone(),
            health: config.health.clone(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Gateway with one session connector per configured backend.
    pub fn from_config(config: &Config) -> Self {
        let connectors = config
            .backends
            .iter()
            .map(|backend| Arc::new(SessionConnector::from_config(backend, config)) as Arc<dyn Connector>)
            .collect();
        Self::new(connectors, config.registry.path.clone(), config)
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }

    pub fn connectors(&self) -> &[Arc<dyn Connector>] {
        &self.connectors
    }

    pub fn connector(&self, id: &str) -> Option<&Arc<dyn Connector>> {
        self.by_id.get(id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load the persisted registry, start every backend concurrently, then
    /// rebuild and persist the registry from the backends that came up.
    pub async fn start(&self) -> StartupSummary {
        let (registry_source, registry_error) = match self.store.load_from_disk() {
            Ok(source) => (Some(source), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let results = join_all(
            self.connectors
                .iter()
                .map(|c| async move { (c.id().clone(), c.start().await) }),
        )
        .await;

        let mut ready = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => ready.push(id),
                Err(e) => {
                    tracing::error!(backend = %id, error = %e, "backend did not start");
                    failed.push(id);
                }
            }
        }

        let reload_error = match self.reload().await {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };

        let summary = StartupSummary {
            registry_source,
            registry_error,
            ready,
            failed,
            reload_error,
            total_tools: self.store.current().total_tools(),
        };
        tracing::info!(
            ready = summary.ready.len(),
            failed = summary.failed.len(),
            total_tools = summary.total_tools,
            "gateway started"
        );
        summary
    }

    /// Stop every connector (killing child processes).
    pub async fn shutdown(&self) {
        join_all(self.connectors.iter().map(|c| c.shutdown())).await;
        tracing::info!("gateway stopped");
    }

    // =========================================================================
    // Catalog reads
    // =========================================================================

    fn live_backends(&self) -> HashSet<BackendId> {
        self.connectors
            .iter()
            .filter(|c| c.status().is_live())
            .map(|c| c.id().clone())
            .collect()
    }

    /// Tools of ready backends, in registry order. No backend I/O.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.list_tools_filtered(&ToolFilter::default())
    }

    pub fn list_tools_filtered(&self, filter: &ToolFilter) -> Vec<ToolDefinition> {
        let registry = self.store.current();
        let live = self.live_backends();
        catalog::filter_tools(registry.tools(), filter, |owner| live.contains(owner))
    }

    /// Ranked search over tools of ready backends.
    pub fn search_tools(&self, query: &str) -> Vec<SearchHit> {
        let registry = self.store.current();
        let live = self.live_backends();
        catalog::search(
            registry.tools().iter().filter(|t| live.contains(&t.owner_id)),
            query,
        )
    }

    pub fn get_tool(&self, name: &str) -> Result<ToolDefinition> {
        self.store
            .current()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::tool_not_found(name))
    }

    /// Category → sorted tool names.
    pub fn categories(&self) -> BTreeMap<String, Vec<String>> {
        self.store.current().categories()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        self.call_tool_with_timeout(name, args, None).await
    }

    /// Call a tool. The timeout falls back to the backend's, then the dispatch default.
    ///
    /// A caller timeout of zero is rejected; one below
    /// `dispatch.min_caller_timeout` is raised to it, since every timeout
    /// counts against the backend's health.
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let registry = self.store.current();
        let tool = registry.get(name).ok_or_else(|| Error::tool_not_found(name))?;
        let connector = self.by_id.get(&tool.owner_id).ok_or_else(|| {
            Error::internal(format!(
                "tool '{}' owned by unknown backend '{}'",
                name, tool.owner_id
            ))
        })?;

        tool.validate_args(&args)?;
        let timeout = match timeout {
            Some(t) if t.is_zero() => {
                return Err(Error::validation("timeout must be positive"));
            }
            Some(t) => Some(t.max(self.dispatch.min_caller_timeout)),
            None => None,
        };

        let status = connector.status();
        if !status.accepts_calls() {
            return Err(Error::backend_unavailable(format!(
                "backend {} is {}",
                tool.owner_id, status
            )));
        }

        let timeout = timeout
            .or_else(|| connector.call_timeout())
            .unwrap_or(self.dispatch.default_timeout);
        tracing::debug!(tool = %name, backend = %tool.owner_id, timeout_ms = timeout.as_millis() as u64, "dispatching tool call");

        self.instrumentation
            .instrument(name, connector.call(name, args, timeout))
            .await
    }

    /// Run calls in order, continuing past failures.
    pub async fn batch_call(&self, calls: Vec<BatchCall>) -> Result<BatchOutcome> {
        if calls.len() > self.dispatch.max_batch_size {
            return Err(Error::validation(format!(
                "batch of {} calls exceeds limit of {}",
                calls.len(),
                self.dispatch.max_batch_size
            )));
        }

        let start = Instant::now();
        let mut items = Vec::with_capacity(calls.len());
        for (index, call) in calls.into_iter().enumerate() {
            let outcome = match batch::entry_name(index, &call) {
                Ok(name) => self.call_tool(name, call.args.clone()).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &outcome {
                tracing::debug!(index, error = %e, "batch entry failed; continuing");
            }
            items.push(BatchItem {
                index,
                name: call.name,
                outcome,
            });
        }

        let duration = start.elapsed();
        self.instrumentation.observe_batch(items.len(), duration);
        Ok(BatchOutcome { items, duration })
    }

    // =========================================================================
    // Registry maintenance
    // =========================================================================

    /// Rebuild the registry from the backends and persist it.
    pub async fn reload(&self) -> Result<ReloadSummary> {
        let previous = self.store.current().total_tools();
        let registry = self.store.reload(&self.connectors).await?;
        Ok(ReloadSummary {
            previous,
            current: registry.total_tools(),
            generated_at: registry.generated_at(),
        })
    }

    /// Operator restart of one backend, followed by a reload.
    pub async fn restart_backend(&self, id: &str) -> Result<BackendDescriptor> {
        let connector = self
            .by_id
            .get(id)
            .ok_or_else(|| Error::not_found(format!("backend '{}'", id)))?;

        tracing::info!(backend = %id, "operator restart requested");
        connector.restart().await?;

        if let Err(e) = self.reload().await {
            tracing::warn!(backend = %id, error = %e, "reload after restart failed");
        }
        Ok(connector.descriptor())
    }

    // =========================================================================
    // Health & status
    // =========================================================================

    pub fn backends(&self) -> Vec<BackendDescriptor> {
        self.connectors.iter().map(|c| c.descriptor()).collect()
    }

    /// Ping every backend and check the persisted registry.
    pub async fn full_health_check(&self) -> HealthReport {
        let registry = self.store.current();
        let ping_timeout = self.health.ping_timeout;

        let backends = join_all(self.connectors.iter().map(|c| {
            let registry = registry.clone();
            async move {
                let status = c.status();
                let (reachable, ping_ms, ping_error) = if status.accepts_calls() {
                    match c.ping(ping_timeout).await {
                        Ok(latency) => (true, Some(latency.as_millis() as u64), None),
                        Err(e) => (false, None, Some(e.to_string())),
                    }
                } else {
                    (false, None, Some(format!("backend is {}", status)))
                };
                BackendReport {
                    descriptor: c.descriptor(),
                    reachable,
                    ping_ms,
                    ping_error,
                    tools: registry.tools_for(c.id()).count(),
                }
            }
        }))
        .await;

        let live = self.live_backends();
        let registry_report = RegistryReport {
            total_tools: registry.total_tools(),
            live_tools: registry
                .tools()
                .iter()
                .filter(|t| live.contains(&t.owner_id))
                .count(),
            generated_at: registry.generated_at(),
            schema_version: registry.schema_version(),
            persisted: self.store.check_persisted(),
        };

        HealthReport {
            status: HealthReport::overall(&backends, &registry_report),
            checked_at: Utc::now(),
            backends,
            registry: registry_report,
            flagged_tools: self.instrumentation.flagged(),
        }
    }

    /// Instrumentation report for one tool, or every called tool.
    pub fn tool_stats(&self, name: Option<&str>) -> Vec<ToolStatsReport> {
        match name {
            Some(name) => vec![self.instrumentation.tool_report(name)],
            None => self.instrumentation.report(),
        }
    }

    pub fn status(&self) -> GatewayStatus {
        let registry = self.store.current();
        let live = self.live_backends();
        let mut backends_by_status = BTreeMap::new();
        for connector in &self.connectors {
            *backends_by_status.entry(connector.status()).or_insert(0) += 1;
        }
        GatewayStatus {
            version: env!("CARGO_PKG_VERSION"),
            total_tools: registry.total_tools(),
            live_tools: registry
                .tools()
                .iter()
                .filter(|t| live.contains(&t.owner_id))
                .count(),
            backends: self.connectors.len(),
            backends_by_status,
            registry_path: self.store.path().to_path_buf(),
            generated_at: registry.generated_at(),
            schema_version: registry.schema_version(),
            started_at: self.started_at,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}
