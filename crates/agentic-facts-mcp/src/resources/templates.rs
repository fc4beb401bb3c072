//! Resource URI templates and static resource definitions.

use crate::types::{ResourceDefinition, ResourceTemplateDefinition, JSON_MIME};

pub fn list_templates() -> Vec<ResourceTemplateDefinition> {
    vec![ResourceTemplateDefinition {
        uri_template: "facts://predicate/{name}".to_string(),
        name: "Predicate Facts".to_string(),
        description: Some("Stored facts of one predicate, oldest first".to_string()),
        mime_type: Some(JSON_MIME.to_string()),
    }]
}

pub fn list_resources() -> Vec<ResourceDefinition> {
    vec![
        ResourceDefinition {
            uri: "facts://stats".to_string(),
            name: "Engine Statistics".to_string(),
            description: Some("Fact counts, rule generation, open waits".to_string()),
            mime_type: Some(JSON_MIME.to_string()),
        },
        ResourceDefinition {
            uri: "facts://rules".to_string(),
            name: "Installed Rules".to_string(),
            description: Some("Every rule submission with its source".to_string()),
            mime_type: Some(JSON_MIME.to_string()),
        },
        ResourceDefinition {
            uri: "facts://recent".to_string(),
            name: "Recent Facts".to_string(),
            description: Some("Most recent 20 facts".to_string()),
            mime_type: Some(JSON_MIME.to_string()),
        },
    ]
}
