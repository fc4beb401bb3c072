//! Tool: query_facts — Evaluate a pattern against facts and rules.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use agentic_facts::{Direction, QueryOptions};

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::{parse_args, resolve_time, TimeArg};

#[derive(Debug, Deserialize)]
struct QueryParams {
    pattern: String,
    #[serde(default)]
    order_by: Option<String>,
    #[serde(default)]
    direction: Direction,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    as_of: Option<TimeArg>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "query_facts".to_string(),
        description: Some(
            "Query facts and derived predicates, e.g. user_click(Ref, _) or path(/a, X)".to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "One atom; variables are capitalized" },
                "order_by": { "type": "string", "description": "Variable to sort answers by" },
                "direction": { "type": "string", "enum": ["asc", "desc"], "default": "asc" },
                "limit": { "type": "integer" },
                "as_of": {
                    "type": ["integer", "string"],
                    "description": "Ignore facts observed after this time (ms since epoch or RFC 3339)"
                }
            },
            "required": ["pattern"]
        }),
    }
}

pub async fn execute(args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let params: QueryParams = parse_args(args)?;

    let mut options = QueryOptions::default();
    if let Some(variable) = params.order_by {
        options = options.order_by(variable, params.direction);
    }
    if let Some(limit) = params.limit {
        options = options.limit(limit);
    }
    if let Some(as_of) = resolve_time(params.as_of.as_ref(), "as_of")? {
        options = options.as_of(as_of);
    }

    let bindings = session.engine().query_with(&params.pattern, &options)?;

    Ok(ToolCallResult::json(&json!({
        "pattern": params.pattern,
        "count": bindings.len(),
        "bindings": bindings,
    })))
}
