//! Backend status state machine.
//!
//! ```text
//! unstarted → starting → ready ⇄ degraded → failed
//!                ↑                             │
//!                └──── operator restart ───────┘
//! ```
//!
//! Transitions are named methods so callers (and tests) assert on state, not
//! on log output. Startup retries inside the connector's own backoff budget
//! use [`StartTrigger::Retry`]; once that budget is spent only
//! [`StartTrigger::Operator`] leaves `failed`.

use crate::types::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Unstarted,
    Starting,
    Ready,
    Degraded,
    Failed,
}

impl BackendStatus {
    /// Backends whose tools may be listed during a rebuild.
    pub fn is_listable(self) -> bool {
        matches!(self, BackendStatus::Ready | BackendStatus::Degraded)
    }

    /// Backends that accept calls (degraded calls double as recovery probes).
    pub fn accepts_calls(self) -> bool {
        matches!(self, BackendStatus::Ready | BackendStatus::Degraded)
    }

    /// Backends whose tools appear in caller-facing listings.
    pub fn is_live(self) -> bool {
        self == BackendStatus::Ready
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendStatus::Unstarted => "unstarted",
            BackendStatus::Starting => "starting",
            BackendStatus::Ready => "ready",
            BackendStatus::Degraded => "degraded",
            BackendStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a backend is entering `starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTrigger {
    /// First start after configuration.
    Initial,
    /// Scheduled retry within the startup backoff budget.
    Retry,
    /// Explicit operator request.
    Operator,
}

/// A status change, returned so callers can log or react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BackendStatus,
    pub to: BackendStatus,
}

/// Status plus failure counters for one backend.
#[derive(Debug, Clone)]
pub struct BackendHealth {
    status: BackendStatus,
    consecutive_failures: u32,
    last_seen_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    degrade_after: u32,
    fail_after: u32,
}

impl BackendHealth {
    /// `degrade_after` failures move ready → degraded; `fail_after` more move degraded → failed.
    pub fn new(degrade_after: u32, fail_after: u32) -> Self {
        Self {
            status: BackendStatus::Unstarted,
            consecutive_failures: 0,
            last_seen_at: None,
            last_error: None,
            degrade_after: degrade_after.max(1),
            fail_after: fail_after.max(1),
        }
    }

    pub fn status(&self) -> BackendStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn move_to(&mut self, to: BackendStatus) -> Option<Transition> {
        if self.status == to {
            return None;
        }
        let transition = Transition {
            from: self.status,
            to,
        };
        self.status = to;
        Some(transition)
    }

    /// Enter `starting`.
    pub fn begin_start(&mut self, trigger: StartTrigger) -> Result<Transition> {
        let allowed = match trigger {
            StartTrigger::Initial => self.status == BackendStatus::Unstarted,
            StartTrigger::Retry => self.status == BackendStatus::Failed,
            StartTrigger::Operator => self.status != BackendStatus::Starting,
        };
        if !allowed {
            return Err(Error::validation(format!(
                "cannot start backend in state {} ({:?} start)",
                self.status, trigger
            )));
        }
        if trigger == StartTrigger::Operator {
            self.consecutive_failures = 0;
        }
        self.move_to(BackendStatus::Starting)
            .ok_or_else(|| Error::internal("start transition was a no-op"))
    }

    /// Handshake succeeded: `starting → ready`.
    pub fn handshake_succeeded(&mut self) -> Option<Transition> {
        if self.status != BackendStatus::Starting {
            return None;
        }
        self.consecutive_failures = 0;
        self.last_seen_at = Some(Utc::now());
        self.last_error = None;
        self.move_to(BackendStatus::Ready)
    }

    /// Launch or handshake failed: `starting → failed`.
    pub fn handshake_failed(&mut self, error: &str) -> Option<Transition> {
        if self.status != BackendStatus::Starting {
            return None;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.move_to(BackendStatus::Failed)
    }

    /// The backend answered (even with a domain error).
    pub fn record_success(&mut self) -> Option<Transition> {
        match self.status {
            BackendStatus::Ready | BackendStatus::Degraded => {
                self.consecutive_failures = 0;
                self.last_seen_at = Some(Utc::now());
                self.move_to(BackendStatus::Ready)
            }
            // Late answers for a backend that is restarting or gone change nothing.
            _ => None,
        }
    }

    /// The backend did not answer properly (timeout, malformed reply).
    pub fn record_failure(&mut self, error: &str) -> Option<Transition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.to_string());
        match self.status {
            BackendStatus::Ready if self.consecutive_failures >= self.degrade_after => {
                self.move_to(BackendStatus::Degraded)
            }
            BackendStatus::Degraded
                if self.consecutive_failures >= self.degrade_after + self.fail_after =>
            {
                self.move_to(BackendStatus::Failed)
            }
            _ => None,
        }
    }

    /// Session died (process exited, connection closed).
    pub fn record_disconnect(&mut self, error: &str) -> Option<Transition> {
        self.last_error = Some(error.to_string());
        match self.status {
            BackendStatus::Starting | BackendStatus::Ready | BackendStatus::Degraded => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.move_to(BackendStatus::Failed)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> BackendHealth {
        let mut health = BackendHealth::new(3, 3);
        health.begin_start(StartTrigger::Initial).unwrap();
        health.handshake_succeeded().unwrap();
        health
    }

    #[test]
    fn test_start_to_ready() {
        let mut health = BackendHealth::new(3, 3);
        assert_eq!(health.status(), BackendStatus::Unstarted);

        let t = health.begin_start(StartTrigger::Initial).unwrap();
        assert_eq!((t.from, t.to), (BackendStatus::Unstarted, BackendStatus::Starting));

        let t = health.handshake_succeeded().unwrap();
        assert_eq!(t.to, BackendStatus::Ready);
        assert!(health.last_seen_at().is_some());
    }

    #[test]
    fn test_three_failures_degrade() {
        let mut health = ready();
        assert!(health.record_failure("timeout").is_none());
        assert!(health.record_failure("timeout").is_none());
        let t = health.record_failure("timeout").unwrap();
        assert_eq!((t.from, t.to), (BackendStatus::Ready, BackendStatus::Degraded));
        assert_eq!(health.consecutive_failures(), 3);
    }

    #[test]
    fn test_one_success_recovers_from_degraded() {
        let mut health = ready();
        for _ in 0..3 {
            health.record_failure("timeout");
        }
        let t = health.record_success().unwrap();
        assert_eq!((t.from, t.to), (BackendStatus::Degraded, BackendStatus::Ready));
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn test_success_resets_counter_before_degrading() {
        let mut health = ready();
        health.record_failure("x");
        health.record_failure("x");
        health.record_success();
        health.record_failure("x");
        assert_eq!(health.status(), BackendStatus::Ready);
    }

    #[test]
    fn test_degraded_fails_after_more_failures() {
        let mut health = ready();
        for _ in 0..5 {
            health.record_failure("timeout");
        }
        assert_eq!(health.status(), BackendStatus::Degraded);
        let t = health.record_failure("timeout").unwrap();
        assert_eq!(t.to, BackendStatus::Failed);
    }

    #[test]
    fn test_disconnect_fails_immediately() {
        let mut health = ready();
        let t = health.record_disconnect("stdout closed").unwrap();
        assert_eq!(t.to, BackendStatus::Failed);
        assert_eq!(health.last_error(), Some("stdout closed"));
    }

    #[test]
    fn test_failed_needs_operator_restart() {
        let mut health = ready();
        health.record_disconnect("gone");

        assert!(health.begin_start(StartTrigger::Initial).is_err());
        assert!(health.record_success().is_none());
        assert_eq!(health.status(), BackendStatus::Failed);

        let t = health.begin_start(StartTrigger::Operator).unwrap();
        assert_eq!((t.from, t.to), (BackendStatus::Failed, BackendStatus::Starting));
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn test_retry_only_from_failed() {
        let mut health = BackendHealth::new(3, 3);
        assert!(health.begin_start(StartTrigger::Retry).is_err());
        health.begin_start(StartTrigger::Initial).unwrap();
        health.handshake_failed("spawn failed").unwrap();
        health.begin_start(StartTrigger::Retry).unwrap();
        assert_eq!(health.status(), BackendStatus::Starting);
    }

    #[test]
    fn test_operator_cannot_restart_while_starting() {
        let mut health = BackendHealth::new(3, 3);
        health.begin_start(StartTrigger::Initial).unwrap();
        assert!(health.begin_start(StartTrigger::Operator).is_err());
    }

    #[test]
    fn test_status_predicates() {
        assert!(BackendStatus::Ready.is_live());
        assert!(!BackendStatus::Degraded.is_live());
        assert!(BackendStatus::Degraded.accepts_calls());
        assert!(!BackendStatus::Starting.accepts_calls());
        assert!(!BackendStatus::Failed.is_listable());
    }
}
