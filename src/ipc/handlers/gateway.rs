//! `health.*`, `gateway.*` and `backend.*` handlers.

use crate::gateway::Gateway;
use crate::ipc::router::{str_field, to_value};
use crate::types::{Error, Result};
use serde_json::{json, Value};

pub async fn handle(gateway: &Gateway, method: &str, params: Value) -> Result<Value> {
    match method {
        "health.check" => {
            let report = gateway.full_health_check().await;
            to_value(&report)
        }

        "gateway.status" => to_value(&gateway.status()),

        "gateway.backends" => Ok(json!({ "backends": to_value(&gateway.backends())? })),

        "backend.restart" => {
            let id = str_field(&params, "id")?;
            let descriptor = gateway.restart_backend(&id).await?;
            Ok(json!({ "backend": to_value(&descriptor)? }))
        }

        _ => Err(Error::not_found(format!("Unknown method: {}", method))),
    }
}
