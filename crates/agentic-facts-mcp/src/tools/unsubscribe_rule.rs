//! Tool: unsubscribe_rule — Close a subscription. Idempotent.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::parse_args;

#[derive(Debug, Deserialize)]
struct UnsubscribeParams {
    subscription_id: u64,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "unsubscribe_rule".to_string(),
        description: Some("Close a subscription".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {
                "subscription_id": { "type": "integer" }
            },
            "required": ["subscription_id"]
        }),
    }
}

pub async fn execute(args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let params: UnsubscribeParams = parse_args(args)?;
    let closed = session.unsubscribe(params.subscription_id).await;

    Ok(ToolCallResult::json(&json!({
        "subscription_id": params.subscription_id,
        "unsubscribed": closed,
    })))
}
