//! Batch call request and result types.

use crate::types::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// One entry of a batch request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchCall {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Value,
}

impl BatchCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: Some(name.into()),
            args,
        }
    }
}

/// Result of one batch entry, at its input position.
#[derive(Debug)]
pub struct BatchItem {
    pub index: usize,
    pub name: Option<String>,
    pub outcome: Result<Value>,
}

impl BatchItem {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn to_wire(&self) -> Value {
        match &self.outcome {
            Ok(result) => json!({
                "index": self.index,
                "name": self.name,
                "ok": true,
                "result": result,
            }),
            Err(e) => json!({
                "index": self.index,
                "name": self.name,
                "ok": false,
                "error": e.to_wire(),
            }),
        }
    }
}

/// Ordered results plus a summary.
#[derive(Debug)]
pub struct BatchOutcome {
    pub items: Vec<BatchItem>,
    pub duration: Duration,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub fn to_wire(&self) -> Value {
        json!({
            "results": self.items.iter().map(BatchItem::to_wire).collect::<Vec<_>>(),
            "summary": {
                "total": self.items.len(),
                "succeeded": self.succeeded(),
                "failed": self.failed(),
                "duration_ms": self.duration.as_millis() as u64,
            }
        })
    }
}

/// Name of a batch entry, or the error recorded in its place.
pub(crate) fn entry_name(index: usize, call: &BatchCall) -> Result<&str> {
    match call.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(Error::invalid_arguments(format!(
            "batch entry {} has no tool name",
            index
        ))),
    }
}
