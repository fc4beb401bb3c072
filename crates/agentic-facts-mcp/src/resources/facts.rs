//! Resource: facts://recent and facts://predicate/{name}

use std::sync::Arc;

use serde_json::json;

use crate::session::FactSession;
use crate::types::{McpError, McpResult, ReadResourceResult, ResourceContent};

const RECENT_LIMIT: usize = 20;

pub async fn read_recent(session: &Arc<FactSession>) -> McpResult<ReadResourceResult> {
    let recent = session.engine().recent(None, RECENT_LIMIT);

    let content = json!({
        "count": recent.len(),
        "facts": recent,
    });

    Ok(ReadResourceResult {
        contents: vec![ResourceContent::json("facts://recent", &content)],
    })
}

pub async fn read_predicate(
    name: &str,
    session: &Arc<FactSession>,
) -> McpResult<ReadResourceResult> {
    let snapshot = session.engine().snapshot();
    let relation = snapshot
        .relation(name)
        .ok_or_else(|| McpError::ResourceNotFound(format!("facts://predicate/{name}")))?;
    let facts: Vec<_> = relation.iter().collect();

    let content = json!({
        "predicate": name,
        "count": facts.len(),
        "facts": facts,
    });

    Ok(ReadResourceResult {
        contents: vec![ResourceContent::json(
            &format!("facts://predicate/{name}"),
            &content,
        )],
    })
}
