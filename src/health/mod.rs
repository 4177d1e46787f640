//! Health and validation.
//!
//! - **status**: the per-backend state machine
//! - **report**: the aggregated `FullHealthCheck` report
//! - **monitor**: the periodic health loop and its recovery actions

pub mod monitor;
pub mod report;
pub mod status;

pub use monitor::HealthMonitor;
pub use report::{BackendReport, HealthReport, RegistryReport};
pub use status::{BackendHealth, BackendStatus, StartTrigger, Transition};

use serde::{Deserialize, Serialize};

/// Coarse health assessment used for tools, backends and the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    fn rank(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
            HealthStatus::Unknown => 3,
        }
    }

    /// The worse of two assessments (unknown ranks worst).
    pub fn worse(self, other: HealthStatus) -> HealthStatus {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }
}
