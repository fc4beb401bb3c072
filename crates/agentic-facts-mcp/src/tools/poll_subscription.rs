//! Tool: poll_subscription — Drain buffered subscription events.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::parse_args;

#[derive(Debug, Deserialize)]
struct PollParams {
    subscription_id: u64,
    #[serde(default = "default_max_events")]
    max_events: usize,
    #[serde(default)]
    wait_ms: u64,
}

fn default_max_events() -> usize {
    16
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "poll_subscription".to_string(),
        description: Some(
            "Fetch pending change events of a subscription, optionally waiting for one"
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "subscription_id": { "type": "integer" },
                "max_events": { "type": "integer", "default": 16 },
                "wait_ms": {
                    "type": "integer",
                    "default": 0,
                    "description": "How long to wait when nothing is pending"
                }
            },
            "required": ["subscription_id"]
        }),
    }
}

pub async fn execute(args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let params: PollParams = parse_args(args)?;
    let polled = session
        .poll(
            params.subscription_id,
            params.max_events.max(1),
            Duration::from_millis(params.wait_ms),
        )
        .await?;

    Ok(ToolCallResult::json(&json!({
        "subscription_id": params.subscription_id,
        "events": polled.events,
        "lossy": polled.lossy,
        "closed": polled.closed,
    })))
}
