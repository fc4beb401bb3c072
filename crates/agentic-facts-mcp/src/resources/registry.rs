//! Resource registration and dispatch.

use std::sync::Arc;

use crate::session::FactSession;
use crate::types::{
    McpError, McpResult, ReadResourceResult, ResourceDefinition, ResourceTemplateDefinition,
};

use super::{facts, stats, templates};

pub struct ResourceRegistry;

impl ResourceRegistry {
    pub fn list_templates() -> Vec<ResourceTemplateDefinition> {
        templates::list_templates()
    }

    pub fn list_resources() -> Vec<ResourceDefinition> {
        templates::list_resources()
    }

    pub async fn read(uri: &str, session: &Arc<FactSession>) -> McpResult<ReadResourceResult> {
        if let Some(name) = uri.strip_prefix("facts://predicate/") {
            if name.is_empty() {
                return Err(McpError::InvalidParams(
                    "Predicate URI must be facts://predicate/{name}".to_string(),
                ));
            }
            facts::read_predicate(name, session).await
        } else if uri == "facts://stats" {
            stats::read_stats(session).await
        } else if uri == "facts://rules" {
            stats::read_rules(session).await
        } else if uri == "facts://recent" {
            facts::read_recent(session).await
        } else {
            Err(McpError::ResourceNotFound(uri.to_string()))
        }
    }
}
