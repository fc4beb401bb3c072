//! Tool: list_rules — Installed rule submissions.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "list_rules".to_string(),
        description: Some("List installed rules with their ids and source".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {}
        }),
    }
}

pub async fn execute(_args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let rules = session.engine().list_rules();

    Ok(ToolCallResult::json(&json!({
        "count": rules.len(),
        "rules": rules,
    })))
}
