//! Tool: submit_rule — Validate and install declarations and rules.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::FactSession;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::encoding::parse_args;

#[derive(Debug, Deserialize)]
struct SubmitParams {
    rule: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "submit_rule".to_string(),
        description: Some(
            "Install Datalog rules, e.g. `ready(X) :- loaded(X), not busy(X).` \
             Rejected if unsafe, not stratifiable, or arity-inconsistent"
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "rule": {
                    "type": "string",
                    "description": "One or more clauses or `Decl` declarations, each ending in '.'"
                }
            },
            "required": ["rule"]
        }),
    }
}

pub async fn execute(args: Value, session: &Arc<FactSession>) -> McpResult<ToolCallResult> {
    let params: SubmitParams = parse_args(args)?;
    let engine = session.engine();
    let id = engine.submit_rule(&params.rule)?;

    let summary = engine.list_rules().into_iter().find(|r| r.id == id);
    Ok(ToolCallResult::json(&json!({
        "rule_id": id,
        "heads": summary.as_ref().map(|s| s.heads.clone()).unwrap_or_default(),
        "declares": summary.map(|s| s.declares).unwrap_or_default(),
    })))
}
