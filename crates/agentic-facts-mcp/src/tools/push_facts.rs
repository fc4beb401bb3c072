//! Tool: push_facts — Append a batch of observations to the fact store.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::{decode_fact, parse_args};

#[derive(Debug, Deserialize)]
struct PushParams {
    facts: Vec<Value>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "push_facts".to_string(),
        description: Some(
            "Push observed facts. Each fact is accepted or rejected on its own".to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "facts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "predicate": { "type": "string" },
                            "args": { "type": "array", "description": "Strings, numbers, booleans, lists, or objects" },
                            "timestamp": {
                                "type": ["integer", "string"],
                                "description": "Milliseconds since epoch or RFC 3339; defaults to arrival time"
                            },
                            "origin": { "type": "string", "description": "Producer tag" }
                        },
                        "required": ["predicate"]
                    }
                }
            },
            "required": ["facts"]
        }),
    }
}

pub async fn execute(args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let params: PushParams = parse_args(args)?;

    let mut inputs = Vec::with_capacity(params.facts.len());
    let mut malformed = Vec::new();
    for raw in params.facts {
        match decode_fact(raw) {
            Ok(input) => inputs.push(input),
            Err(rejected) => malformed.push(rejected),
        }
    }

    let mut outcome = session.engine().push(inputs);
    outcome.rejected.extend(malformed);

    Ok(ToolCallResult::json(&json!({
        "accepted": outcome.accepted,
        "rejected": outcome.rejected,
    })))
}
