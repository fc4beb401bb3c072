//! Tool: await_conditions — Block until every pattern holds together.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::session::FactSession;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::encoding::{default_timeout_ms, parse_args};

#[derive(Debug, Deserialize)]
struct ConditionsParams {
    patterns: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "await_conditions".to_string(),
        description: Some(
            "Wait until all patterns hold at once; shared variables must agree".to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "patterns": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1
                },
                "timeout_ms": { "type": "integer", "default": 10000 }
            },
            "required": ["patterns"]
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<FactSession>,
    cancel: CancellationToken,
) -> McpResult<ToolCallResult> {
    let params: ConditionsParams = parse_args(args)?;
    if params.patterns.is_empty() {
        return Err(McpError::InvalidParams(
            "'patterns' must not be empty".to_string(),
        ));
    }

    let outcome = session
        .engine()
        .await_conditions(
            &params.patterns,
            Duration::from_millis(params.timeout_ms),
            cancel,
        )
        .await?;

    Ok(ToolCallResult::json(&outcome))
}
