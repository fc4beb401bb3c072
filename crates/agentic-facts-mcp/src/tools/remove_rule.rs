//! Tool: remove_rule — Retract a rule submission by id.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use agentic_facts::RuleId;

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::parse_args;

#[derive(Debug, Deserialize)]
struct RemoveParams {
    rule_id: u64,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "remove_rule".to_string(),
        description: Some("Remove every clause of a rule submission".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {
                "rule_id": { "type": "integer", "description": "Id returned by submit_rule" }
            },
            "required": ["rule_id"]
        }),
    }
}

pub async fn execute(args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let params: RemoveParams = parse_args(args)?;
    session.engine().remove_rule(RuleId(params.rule_id))?;

    Ok(ToolCallResult::json(&json!({
        "rule_id": params.rule_id,
        "removed": true,
    })))
}
