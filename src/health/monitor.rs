//! Periodic health loop.
//!
//! Every `check_interval` the monitor runs a full health check, then:
//! - reloads the registry when a backend came back to `ready`
//!   (if `reload_on_recovery` is set)
//! - otherwise rewrites the registry file when it is missing, corrupt or
//!   out of step with the live registry

use crate::gateway::Gateway;
use crate::health::{BackendStatus, HealthReport, HealthStatus};
use crate::types::{BackendId, HealthConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What one monitor cycle did.
#[derive(Debug)]
pub struct MonitorCycle {
    pub report: HealthReport,
    /// Backends that became ready since the previous cycle.
    pub recovered: Vec<BackendId>,
    pub reloaded: bool,
    pub repaired: bool,
}

#[derive(Debug)]
pub struct HealthMonitor {
    gateway: Arc<Gateway>,
    config: HealthConfig,
    cancel: CancellationToken,
    last_statuses: HashMap<BackendId, BackendStatus>,
}

impl HealthMonitor {
    pub fn new(gateway: Arc<Gateway>, config: &HealthConfig, cancel: CancellationToken) -> Self {
        Self {
            gateway,
            config: config.clone(),
            cancel,
            last_statuses: HashMap::new(),
        }
    }

    /// Run the loop in the background until the token is cancelled.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already checked.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_once().await;
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("health monitor stopped");
                    break;
                }
            }
        }
    }

    /// One health cycle plus its recovery actions.
    pub async fn check_once(&mut self) -> MonitorCycle {
        let report = self.gateway.full_health_check().await;

        let mut recovered = Vec::new();
        for backend in &report.backends {
            let id = &backend.descriptor.id;
            let now = backend.descriptor.status;
            let before = self.last_statuses.insert(id.clone(), now);
            if now == BackendStatus::Ready && before.is_some_and(|b| b != BackendStatus::Ready) {
                recovered.push(id.clone());
            }
        }

        let mut reloaded = false;
        let mut repaired = false;
        if !recovered.is_empty() && self.config.reload_on_recovery {
            tracing::info!(backends = ?recovered, "backends recovered; reloading registry");
            match self.gateway.reload().await {
                Ok(summary) => {
                    reloaded = true;
                    tracing::info!(previous = summary.previous, current = summary.current, "registry reloaded");
                }
                Err(e) => tracing::warn!(error = %e, "reload after recovery failed"),
            }
        } else if !report.registry.persisted.consistent || !report.registry.persisted.matches_live {
            tracing::warn!(
                path = %report.registry.persisted.path.display(),
                issue = report.registry.persisted.issue.as_deref().unwrap_or("differs from live registry"),
                "persisted registry out of step; rewriting"
            );
            match self.gateway.store().repair().await {
                Ok(()) => repaired = true,
                Err(e) => tracing::error!(error = %e, "registry repair failed"),
            }
        }

        match report.status {
            HealthStatus::Healthy => tracing::debug!(backends = report.backends.len(), "health check passed"),
            status => {
                let unready: Vec<String> = report
                    .unready()
                    .map(|b| format!("{}={}", b.descriptor.id, b.descriptor.status))
                    .collect();
                tracing::warn!(status = ?status, unready = ?unready, flagged_tools = report.flagged_tools.len(), "health check");
            }
        }

        MonitorCycle {
            report,
            recovered,
            reloaded,
            repaired,
        }
    }
}
