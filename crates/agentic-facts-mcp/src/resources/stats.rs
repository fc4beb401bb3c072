//! Resource: facts://stats and facts://rules

use std::sync::Arc;

use serde_json::json;

use crate::session::FactSession;
use crate::types::{McpResult, ReadResourceResult, ResourceContent};

pub async fn read_stats(session: &Arc<FactSession>) -> McpResult<ReadResourceResult> {
    let stats = session.engine().stats();

    let content = json!({
        "engine": stats,
        "open_subscriptions": session.subscription_count().await,
        "schema_path": session.schema_path().map(|p| p.display().to_string()),
        "started_at": session.started_at(),
    });

    Ok(ReadResourceResult {
        contents: vec![ResourceContent::json("facts://stats", &content)],
    })
}

pub async fn read_rules(session: &Arc<FactSession>) -> McpResult<ReadResourceResult> {
    let rules = session.engine().list_rules();

    let content = json!({
        "count": rules.len(),
        "rules": rules,
    });

    Ok(ReadResourceResult {
        contents: vec![ResourceContent::json("facts://rules", &content)],
    })
}
