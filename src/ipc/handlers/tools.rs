//! `tools.*` handlers: listing, search, dispatch, batch, reload, stats.

use crate::gateway::{BatchCall, Gateway, ToolFilter};
use crate::ipc::router::{opt_str_field, parse_params, str_field, to_value};
use crate::types::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BatchParams {
    calls: Vec<BatchCall>,
}

pub async fn handle(gateway: &Gateway, op: &str, params: Value) -> Result<Value> {
    match op {
        "list" => {
            let filter: ToolFilter = parse_params(params)?;
            let tools = gateway.list_tools_filtered(&filter);
            Ok(json!({
                "count": tools.len(),
                "tools": to_value(&tools)?,
            }))
        }

        "call" => {
            let call: CallParams = parse_params(params)?;
            let timeout = call.timeout_ms.map(Duration::from_millis);
            gateway.call_tool_with_timeout(&call.name, call.args, timeout).await
        }

        "batch_call" => {
            let batch: BatchParams = parse_params(params)?;
            let outcome = gateway.batch_call(batch.calls).await?;
            Ok(outcome.to_wire())
        }

        "search" => {
            let query = str_field(&params, "query")?;
            let hits = gateway.search_tools(&query);
            Ok(json!({
                "query": query,
                "count": hits.len(),
                "results": to_value(&hits)?,
            }))
        }

        "get" => {
            let name = str_field(&params, "name")?;
            let tool = gateway.get_tool(&name)?;
            let registry = gateway.store().current();
            Ok(json!({
                "tool": to_value(&tool)?,
                "schema_version": registry.schema_version(),
                "generated_at": registry.generated_at(),
            }))
        }

        "categories" => Ok(json!({ "categories": gateway.categories() })),

        "reload" => {
            let summary = gateway.reload().await?;
            to_value(&summary)
        }

        "stats" => {
            let name = opt_str_field(&params, "name");
            let stats = gateway.tool_stats(name.as_deref());
            Ok(json!({ "tools": to_value(&stats)? }))
        }

        _ => Err(Error::not_found(format!("Unknown method: tools.{}", op))),
    }
}
