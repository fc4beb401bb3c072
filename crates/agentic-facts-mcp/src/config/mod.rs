//! Configuration loading and resolution.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use agentic_facts::config::DEFAULT_FACT_CAPACITY;
use agentic_facts::{EngineConfig, RuleOrigin, RuleRegistry};

use crate::types::McpResult;

pub const SCHEMA_ENV: &str = "AGENTIC_FACTS_SCHEMA";
pub const CAPACITY_ENV: &str = "AGENTIC_FACTS_CAPACITY";

/// Schema file looked up in the working directory when nothing else is given.
pub const DEFAULT_SCHEMA_FILE: &str = ".agentic-facts/schema.mg";

/// Resolve the built-in schema file: flag, then environment, then the
/// working-directory default if it exists.
pub fn resolve_schema_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var(SCHEMA_ENV) {
        if !env_path.trim().is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    let cwd_schema = PathBuf::from(DEFAULT_SCHEMA_FILE);
    cwd_schema.exists().then_some(cwd_schema)
}

/// Resolve the per-predicate fact capacity: flag, then environment, then default.
pub fn resolve_capacity(explicit: Option<usize>) -> usize {
    if let Some(capacity) = explicit {
        return capacity;
    }

    match std::env::var(CAPACITY_ENV) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {CAPACITY_ENV}={raw:?}");
            DEFAULT_FACT_CAPACITY
        }),
        Err(_) => DEFAULT_FACT_CAPACITY,
    }
}

/// Engine configuration used by the server.
pub fn engine_config(schema: Option<PathBuf>, capacity: usize) -> EngineConfig {
    let config = EngineConfig::default()
        .with_capacity(capacity)
        .with_low_value_sampling();
    match schema {
        Some(path) => config.with_schema_path(path),
        None => config,
    }
}

/// What a rule file defines, as reported by `check`.
#[derive(Debug, Clone)]
pub struct RuleFileSummary {
    pub rules: usize,
    pub declarations: usize,
    pub derived: BTreeSet<String>,
}

/// Validate a rule file the way the engine would at startup, without
/// starting one.
pub fn check_rule_file(path: &Path) -> McpResult<RuleFileSummary> {
    let text = std::fs::read_to_string(path)?;
    check_rule_text(&text)
}

pub fn check_rule_text(text: &str) -> McpResult<RuleFileSummary> {
    let registry = RuleRegistry::new();
    let (_, rules) = registry.submit(text, RuleOrigin::Builtin)?;
    Ok(RuleFileSummary {
        rules: rules.len(),
        declarations: rules.decls().count(),
        derived: rules
            .rules()
            .iter()
            .map(|r| r.head.predicate.clone())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_capacity_wins() {
        assert_eq!(resolve_capacity(Some(7)), 7);
    }

    #[test]
    fn test_explicit_schema_wins() {
        assert_eq!(
            resolve_schema_path(Some("rules.mg")),
            Some(PathBuf::from("rules.mg"))
        );
    }

    #[test]
    fn test_check_rule_text() {
        let summary = check_rule_text(
            "Decl loaded(url: string).\n\
             ready(U) :- loaded(U), not busy(U).\n\
             busy(U) :- spinner(U).",
        )
        .unwrap();
        assert_eq!(summary.rules, 2);
        assert_eq!(summary.declarations, 1);
        assert!(summary.derived.contains("ready"));
    }

    #[test]
    fn test_check_rule_text_rejects_unsafe_rule() {
        let err = check_rule_text("bad(X) :- not seen(X).").unwrap_err();
        assert_eq!(err.code(), crate::types::mcp_error_codes::RULE_VALIDATION);
    }

    #[test]
    fn test_engine_config_samples_browser_predicates() {
        let config = engine_config(None, 16);
        assert_eq!(config.fact_capacity, 16);
        assert!(config.sampled_predicates.iter().any(|p| p == "dom_node"));
    }
}
