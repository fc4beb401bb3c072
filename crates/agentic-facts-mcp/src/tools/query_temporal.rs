//! Tool: query_temporal — Facts of one predicate inside a time window.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use agentic_facts::TimeWindow;

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::{parse_args, resolve_time, TimeArg};

#[derive(Debug, Deserialize)]
struct TemporalParams {
    predicate: String,
    #[serde(default)]
    after: Option<TimeArg>,
    #[serde(default)]
    before: Option<TimeArg>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "query_temporal".to_string(),
        description: Some(
            "Facts of a predicate observed between two times, inclusive, oldest first".to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "predicate": { "type": "string" },
                "after": { "type": ["integer", "string"], "description": "ms since epoch or RFC 3339" },
                "before": { "type": ["integer", "string"], "description": "ms since epoch or RFC 3339" }
            },
            "required": ["predicate"]
        }),
    }
}

pub async fn execute(args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let params: TemporalParams = parse_args(args)?;
    let window = TimeWindow {
        from: resolve_time(params.after.as_ref(), "after")?,
        to: resolve_time(params.before.as_ref(), "before")?,
    };

    let facts = session.engine().windowed(&params.predicate, &window);

    Ok(ToolCallResult::json(&json!({
        "predicate": params.predicate,
        "count": facts.len(),
        "facts": facts,
    })))
}
