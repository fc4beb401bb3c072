//! Tool: evaluate_rule — Whether a predicate currently holds.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::parse_args;

#[derive(Debug, Deserialize)]
struct EvaluateParams {
    name: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "evaluate_rule".to_string(),
        description: Some("Check whether a predicate holds for any arguments".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Predicate name, e.g. checkout_ready" }
            },
            "required": ["name"]
        }),
    }
}

pub async fn execute(args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let params: EvaluateParams = parse_args(args)?;
    let holds = session.engine().evaluate_rule(&params.name)?;

    Ok(ToolCallResult::json(&json!({
        "name": params.name,
        "holds": holds,
    })))
}
