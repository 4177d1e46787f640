//! Aggregated health report returned by a full health check.

use crate::backend::BackendDescriptor;
use crate::health::{BackendStatus, HealthStatus};
use crate::instrumentation::ToolStatsReport;
use crate::registry::PersistedCheck;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One backend's result in a health check.
#[derive(Debug, Clone, Serialize)]
pub struct BackendReport {
    #[serde(flatten)]
    pub descriptor: BackendDescriptor,
    /// The no-op round trip succeeded.
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_error: Option<String>,
    /// Tools this backend contributes to the registry.
    pub tools: usize,
}

/// Registry state in a health check.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryReport {
    pub total_tools: usize,
    /// Tools currently visible to callers.
    pub live_tools: usize,
    pub generated_at: DateTime<Utc>,
    pub schema_version: u32,
    pub persisted: PersistedCheck,
}

/// Result of a full health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub backends: Vec<BackendReport>,
    pub registry: RegistryReport,
    /// Tools currently slow or erroring.
    pub flagged_tools: Vec<ToolStatsReport>,
}

impl HealthReport {
    /// Overall status: healthy when every backend is ready and reachable and
    /// the persisted registry is consistent; unhealthy when no backend is
    /// reachable; degraded otherwise.
    pub fn overall(backends: &[BackendReport], registry: &RegistryReport) -> HealthStatus {
        if backends.is_empty() {
            return if registry.persisted.consistent {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            };
        }
        if backends.iter().all(|b| !b.reachable) {
            return HealthStatus::Unhealthy;
        }
        let all_ready = backends
            .iter()
            .all(|b| b.reachable && b.descriptor.status == BackendStatus::Ready);
        if all_ready && registry.persisted.consistent && registry.persisted.matches_live {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }

    /// Backends that are not ready.
    pub fn unready(&self) -> impl Iterator<Item = &BackendReport> {
        self.backends
            .iter()
            .filter(|b| b.descriptor.status != BackendStatus::Ready)
    }
}
