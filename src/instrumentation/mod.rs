//! Call instrumentation.
//!
//! Every dispatched call is timed and classified against two configurable
//! thresholds: interactive (single calls) and batch (whole batches). Calls
//! over their threshold emit a structured `warn!` with the tool name, the
//! measured duration and the threshold it crossed. Outcomes also feed the
//! per-tool rolling statistics in [`stats`].

pub mod stats;

pub use stats::{ToolStats, ToolStatsReport};

use crate::types::{Error, InstrumentationConfig, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Error,
    Timeout,
}

impl CallOutcome {
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => CallOutcome::Success,
            Err(Error::Timeout(_)) => CallOutcome::Timeout,
            Err(_) => CallOutcome::Error,
        }
    }
}

/// One timed call.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub tool_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub outcome: CallOutcome,
}

/// Threshold class a call is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    Interactive,
    Batch,
}

impl LatencyClass {
    pub fn as_str(self) -> &'static str {
        match self {
            LatencyClass::Interactive => "interactive",
            LatencyClass::Batch => "batch",
        }
    }
}

/// Call timing, slow-call warnings and per-tool statistics.
#[derive(Debug)]
pub struct Instrumentation {
    config: InstrumentationConfig,
    stats: Mutex<HashMap<String, ToolStats>>,
}

impl Instrumentation {
    pub fn new(config: InstrumentationConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &InstrumentationConfig {
        &self.config
    }

    pub fn threshold(&self, class: LatencyClass) -> Duration {
        match class {
            LatencyClass::Interactive => self.config.interactive_threshold,
            LatencyClass::Batch => self.config.batch_threshold,
        }
    }

    /// Whether `duration` crosses the threshold of `class`.
    pub fn is_slow(&self, duration: Duration, class: LatencyClass) -> bool {
        duration > self.threshold(class)
    }

    /// Time a call, record its outcome and warn if it was slow.
    pub async fn instrument<T, F>(&self, tool_name: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let result = call.await;
        self.record(CallRecord {
            tool_name: tool_name.to_string(),
            started_at,
            duration: start.elapsed(),
            outcome: CallOutcome::of(&result),
        });
        result
    }

    /// Record a finished call. Returns whether it was slow.
    pub fn record(&self, record: CallRecord) -> bool {
        let slow = self.check_latency(&record.tool_name, record.duration, LatencyClass::Interactive);
        self.stats
            .lock()
            .entry(record.tool_name.clone())
            .or_insert_with(|| ToolStats::new(self.config.window_size))
            .record(record.duration, record.outcome, slow);
        tracing::trace!(
            tool = %record.tool_name,
            duration_ms = record.duration.as_millis() as u64,
            outcome = ?record.outcome,
            "tool call recorded"
        );
        slow
    }

    /// Warn when a whole batch crosses the batch threshold.
    pub fn observe_batch(&self, size: usize, duration: Duration) -> bool {
        self.check_latency(&format!("batch[{}]", size), duration, LatencyClass::Batch)
    }

    fn check_latency(&self, tool: &str, duration: Duration, class: LatencyClass) -> bool {
        let threshold = self.threshold(class);
        if duration <= threshold {
            return false;
        }
        tracing::warn!(
            tool = %tool,
            duration_ms = duration.as_millis() as u64,
            threshold_ms = threshold.as_millis() as u64,
            class = class.as_str(),
            "slow tool call"
        );
        true
    }

    /// Statistics for one tool.
    pub fn tool_report(&self, tool_name: &str) -> ToolStatsReport {
        self.stats
            .lock()
            .get(tool_name)
            .map(|s| s.report(tool_name, &self.config))
            .unwrap_or_else(|| ToolStatsReport::empty(tool_name))
    }

    /// Statistics for every tool that has been called, sorted by name.
    pub fn report(&self) -> Vec<ToolStatsReport> {
        let stats = self.stats.lock();
        let mut reports: Vec<ToolStatsReport> = stats
            .iter()
            .map(|(name, s)| s.report(name, &self.config))
            .collect();
        reports.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        reports
    }

    /// Tools currently slow or erroring.
    pub fn flagged(&self) -> Vec<ToolStatsReport> {
        self.report().into_iter().filter(|r| r.is_flagged()).collect()
    }
}
