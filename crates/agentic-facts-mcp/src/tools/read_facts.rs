//! Tool: read_facts — Newest facts first, optionally for one predicate.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::parse_args;

#[derive(Debug, Deserialize)]
struct ReadParams {
    #[serde(default)]
    predicate: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    25
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "read_facts".to_string(),
        description: Some("Read the most recent stored facts".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {
                "predicate": { "type": "string", "description": "Only this predicate" },
                "limit": { "type": "integer", "default": 25 }
            }
        }),
    }
}

pub async fn execute(args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let params: ReadParams = parse_args(args)?;
    let facts = session
        .engine()
        .recent(params.predicate.as_deref(), params.limit);

    Ok(ToolCallResult::json(&json!({
        "count": facts.len(),
        "facts": facts,
    })))
}
