//! Tool: subscribe_rule — Watch a pattern for answer-set changes.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::parse_args;

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    pattern: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "subscribe_rule".to_string(),
        description: Some(
            "Subscribe to a pattern; read changes with poll_subscription".to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "e.g. alert(Level, Msg)" }
            },
            "required": ["pattern"]
        }),
    }
}

pub async fn execute(args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let params: SubscribeParams = parse_args(args)?;
    let id = session.subscribe(&params.pattern).await?;

    Ok(ToolCallResult::json(&json!({
        "subscription_id": id,
        "pattern": params.pattern,
    })))
}
