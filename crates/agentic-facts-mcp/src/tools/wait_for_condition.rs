//! Tool: wait_for_condition — Like await_fact, polling when the predicate
//! has no rule, declaration, or fact yet.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::{default_timeout_ms, parse_args};

#[derive(Debug, Deserialize)]
struct ConditionParams {
    pattern: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "wait_for_condition".to_string(),
        description: Some(
            "Wait for a condition such as toast_shown(_), polling if nothing tracks it yet"
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "timeout_ms": { "type": "integer", "default": 10000 },
                "poll_interval_ms": {
                    "type": "integer",
                    "default": 200,
                    "description": "Clamped to 10..5000"
                }
            },
            "required": ["pattern"]
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<FactSession>,
    cancel: CancellationToken,
) -> McpResult<ToolCallResult> {
    let params: ConditionParams = parse_args(args)?;
    let outcome = session
        .engine()
        .wait_for_condition(
            &params.pattern,
            Duration::from_millis(params.timeout_ms),
            params.poll_interval_ms.map(Duration::from_millis),
            cancel,
        )
        .await?;

    Ok(ToolCallResult::json(&outcome))
}
