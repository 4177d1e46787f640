//! Per-tool rolling call statistics.
//!
//! Lifetime counters plus a sliding window of recent calls. Percentiles and
//! the error rate come from the window, so a tool recovers its assessment
//! once old failures age out.

use crate::health::HealthStatus;
use crate::instrumentation::CallOutcome;
use crate::types::InstrumentationConfig;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Sample {
    duration_ms: u64,
    outcome: CallOutcome,
}

/// Rolling statistics for a single tool.
#[derive(Debug)]
pub struct ToolStats {
    window: VecDeque<Sample>,
    window_size: usize,
    total_calls: u64,
    error_count: u64,
    timeout_count: u64,
    slow_count: u64,
}

impl ToolStats {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            total_calls: 0,
            error_count: 0,
            timeout_count: 0,
            slow_count: 0,
        }
    }

    pub fn record(&mut self, duration: Duration, outcome: CallOutcome, slow: bool) {
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(Sample {
            duration_ms: duration.as_millis() as u64,
            outcome,
        });

        self.total_calls += 1;
        match outcome {
            CallOutcome::Success => {}
            CallOutcome::Error => self.error_count += 1,
            CallOutcome::Timeout => self.timeout_count += 1,
        }
        if slow {
            self.slow_count += 1;
        }
    }

    pub fn window_calls(&self) -> usize {
        self.window.len()
    }

    /// Errors and timeouts over the window.
    pub fn error_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failed = self
            .window
            .iter()
            .filter(|s| s.outcome != CallOutcome::Success)
            .count();
        failed as f64 / self.window.len() as f64
    }

    /// Nearest-rank percentile over the window, in milliseconds.
    pub fn percentile_ms(&self, pct: f64) -> Option<u64> {
        if self.window.is_empty() {
            return None;
        }
        let mut durations: Vec<u64> = self.window.iter().map(|s| s.duration_ms).collect();
        durations.sort_unstable();
        let rank = ((pct / 100.0) * durations.len() as f64).ceil() as usize;
        Some(durations[rank.clamp(1, durations.len()) - 1])
    }

    pub fn max_ms(&self) -> Option<u64> {
        self.window.iter().map(|s| s.duration_ms).max()
    }

    /// Assess this tool against the configured thresholds.
    pub fn report(&self, tool_name: &str, config: &InstrumentationConfig) -> ToolStatsReport {
        let p50_ms = self.percentile_ms(50.0);
        let p95_ms = self.percentile_ms(95.0);
        let error_rate = self.error_rate();
        let window_calls = self.window_calls();

        let mut report = ToolStatsReport {
            tool_name: tool_name.to_string(),
            status: HealthStatus::Unknown,
            total_calls: self.total_calls,
            error_count: self.error_count,
            timeout_count: self.timeout_count,
            slow_count: self.slow_count,
            window_calls,
            error_rate,
            p50_ms,
            p95_ms,
            max_ms: self.max_ms(),
            slow: false,
            erroring: false,
            issues: Vec::new(),
        };

        if window_calls < config.min_calls_for_assessment {
            report.issues.push(format!(
                "Insufficient data ({}/{})",
                window_calls, config.min_calls_for_assessment
            ));
            return report;
        }

        let rate_status = if error_rate >= config.error_rate_unhealthy {
            HealthStatus::Unhealthy
        } else if error_rate >= config.error_rate_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let p95 = p95_ms.unwrap_or(0);
        let interactive_ms = config.interactive_threshold.as_millis() as u64;
        let batch_ms = config.batch_threshold.as_millis() as u64;
        let latency_status = if p95 > batch_ms {
            HealthStatus::Unhealthy
        } else if p95 > interactive_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        if rate_status != HealthStatus::Healthy {
            report.erroring = true;
            report.issues.push(format!(
                "Error rate {:.1}% at or above {:.0}% threshold",
                error_rate * 100.0,
                config.error_rate_degraded * 100.0,
            ));
        }
        if latency_status != HealthStatus::Healthy {
            report.slow = true;
            report.issues.push(format!(
                "p95 latency {}ms exceeds {}ms threshold",
                p95, interactive_ms
            ));
        }

        report.status = rate_status.worse(latency_status);
        report
    }
}

/// Assessment of one tool's recent calls.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatsReport {
    pub tool_name: String,
    pub status: HealthStatus,
    pub total_calls: u64,
    pub error_count: u64,
    pub timeout_count: u64,
    pub slow_count: u64,
    pub window_calls: usize,
    pub error_rate: f64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub slow: bool,
    pub erroring: bool,
    pub issues: Vec<String>,
}

impl ToolStatsReport {
    /// Report for a tool that has never been called.
    pub fn empty(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            status: HealthStatus::Unknown,
            total_calls: 0,
            error_count: 0,
            timeout_count: 0,
            slow_count: 0,
            window_calls: 0,
            error_rate: 0.0,
            p50_ms: None,
            p95_ms: None,
            max_ms: None,
            slow: false,
            erroring: false,
            issues: vec!["No call history".to_string()],
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.slow || self.erroring
    }
}
