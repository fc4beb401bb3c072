//! Tool: await_fact — Block until a pattern has an answer, or time out.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::{default_timeout_ms, parse_args};

#[derive(Debug, Deserialize)]
struct AwaitParams {
    pattern: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "await_fact".to_string(),
        description: Some(
            "Wait until a fact or derived predicate matching the pattern exists".to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "e.g. page_loaded(Url)" },
                "timeout_ms": { "type": "integer", "default": 10000 }
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
    let params: AwaitParams = parse_args(args)?;
    let outcome = session
        .engine()
        .await_fact(&params.pattern, Duration::from_millis(params.timeout_ms), cancel)
        .await?;

    Ok(ToolCallResult::json(&outcome))
}
