//! Configuration structures.
//!
//! Configuration is loaded from a JSON file, with every section optional and
//! defaulted. Durations use humantime strings ("5s", "750ms").

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{BackendId, Error, Result};

/// Global gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Registry persistence.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Dispatch defaults.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Slow-call thresholds and rolling counters.
    #[serde(default)]
    pub instrumentation: InstrumentationConfig,

    /// Backend health state machine and periodic checks.
    #[serde(default)]
    pub health: HealthConfig,

    /// Startup retry policy.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// IPC transport configuration.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Backends, in registry merge order.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl Config {
    /// Read and validate a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::validation(format!("invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.as_str().is_empty() {
                return Err(Error::validation("backend id cannot be empty"));
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate backend id: {}",
                    backend.id
                )));
            }
            if let LaunchSpec::Process { command, .. } = &backend.launch {
                if command.is_empty() {
                    return Err(Error::validation(format!(
                        "backend {}: command cannot be empty",
                        backend.id
                    )));
                }
            }
        }
        if self.instrumentation.interactive_threshold.is_zero()
            || self.instrumentation.batch_threshold.is_zero()
        {
            return Err(Error::validation("instrumentation thresholds must be positive"));
        }
        if self.health.degrade_after == 0 || self.health.fail_after == 0 {
            return Err(Error::validation("health failure thresholds must be positive"));
        }
        if self.dispatch.default_timeout.is_zero() {
            return Err(Error::validation("dispatch.default_timeout must be positive"));
        }
        if self.dispatch.min_caller_timeout > self.dispatch.default_timeout {
            return Err(Error::validation(
                "dispatch.min_caller_timeout cannot exceed dispatch.default_timeout",
            ));
        }
        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Inbound loopback listen address.
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50061".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Registry persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry file; `<path>.bak` and `<path>.tmp` live beside it.
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/tool_registry.json"),
        }
    }
}

/// Dispatch defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Call timeout when neither the backend nor the caller sets one.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Maximum entries accepted in one batch call.
    pub max_batch_size: usize,

    /// Floor for caller-supplied call timeouts. Shorter ones are raised to it.
    #[serde(with = "humantime_serde")]
    pub min_caller_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_batch_size: 64,
            min_caller_timeout: Duration::from_millis(100),
        }
    }
}

/// Instrumentation thresholds (configurable, not hardcoded).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Single calls slower than this emit a warning (default: 500ms).
    #[serde(with = "humantime_serde")]
    pub interactive_threshold: Duration,
    /// Calls and whole batches slower than this emit a batch-class warning (default: 5s).
    #[serde(with = "humantime_serde")]
    pub batch_threshold: Duration,
    /// Sliding window size per tool (default: 100).
    pub window_size: usize,
    /// Minimum calls before a tool is assessed (default: 5).
    pub min_calls_for_assessment: usize,
    /// Error rate at or above which a tool is "erroring" (default: 0.2).
    pub error_rate_degraded: f64,
    /// Error rate at or above which a tool is unhealthy (default: 0.5).
    pub error_rate_unhealthy: f64,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            interactive_threshold: Duration::from_millis(500),
            batch_threshold: Duration::from_secs(5),
            window_size: 100,
            min_calls_for_assessment: 5,
            error_rate_degraded: 0.2,
            error_rate_unhealthy: 0.5,
        }
    }
}

/// Backend health configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures that move `ready → degraded` (default: 3).
    pub degrade_after: u32,
    /// Further consecutive failures that move `degraded → failed` (default: 3).
    pub fail_after: u32,
    /// Interval of the periodic health loop (default: 30s).
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Handshake timeout at start (default: 30s).
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// No-op call timeout during health checks (default: 2s).
    #[serde(with = "humantime_serde")]
    pub ping_timeout: Duration,
    /// Reload the registry when a backend comes back to `ready` (default: true).
    pub reload_on_recovery: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degrade_after: 3,
            fail_after: 3,
            check_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(2),
            reload_on_recovery: true,
        }
    }
}

/// Exponential backoff for backend start attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First retry delay (default: 1s).
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Delay cap (default: 30s).
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Retries after the first attempt before giving up (default: 5).
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

/// IPC transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum concurrent TCP connections. Connections beyond this limit
    /// are rejected.
    pub max_connections: usize,

    /// Read timeout in seconds per frame. Connections idle beyond this
    /// duration are dropped.
    pub read_timeout_secs: u64,

    /// Write timeout in seconds per frame.
    pub write_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            max_connections: 256,
            read_timeout_secs: 300,
            write_timeout_secs: 10,
        }
    }
}

/// Static description of one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: BackendId,
    pub launch: LaunchSpec,
    /// Category applied to tools the backend lists without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Per-backend call timeout override.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub call_timeout: Option<Duration>,
}

/// How to start or reach a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum LaunchSpec {
    /// Child process speaking the line protocol over stdin/stdout.
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    /// Already-running backend on a TCP endpoint.
    Tcp { addr: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"{
            "registry": {"path": "/tmp/reg.json"},
            "instrumentation": {
                "interactive_threshold": "750ms",
                "batch_threshold": "4s",
                "window_size": 50,
                "min_calls_for_assessment": 3,
                "error_rate_degraded": 0.1,
                "error_rate_unhealthy": 0.4
            },
            "backends": [
                {"id": "docs", "launch": {"transport": "process", "command": "python3", "args": ["docs.py"]}},
                {"id": "flows", "launch": {"transport": "tcp", "addr": "127.0.0.1:7001"}, "call_timeout": "90s"}
            ]
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();

        assert_eq!(config.instrumentation.interactive_threshold, Duration::from_millis(750));
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1].call_timeout, Some(Duration::from_secs(90)));
        assert!(matches!(config.backends[0].launch, LaunchSpec::Process { .. }));
        assert_eq!(config.health.degrade_after, 3);
    }

    #[test]
    fn test_caller_timeout_floor_cannot_exceed_default() {
        let raw = r#"{"dispatch": {"default_timeout": "1s", "min_caller_timeout": "2s"}}"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_caller_timeout"));
        assert_eq!(Config::default().dispatch.min_caller_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_duplicate_backend_rejected() {
        let raw = r#"{"backends": [
            {"id": "a", "launch": {"transport": "tcp", "addr": "127.0.0.1:1"}},
            {"id": "a", "launch": {"transport": "tcp", "addr": "127.0.0.1:2"}}
        ]}"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate backend id"));
    }

    #[test]
    fn test_empty_backend_id_rejected() {
        let raw = r#"{"backends": [{"id": "", "launch": {"transport": "tcp", "addr": "x"}}]}"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
