//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{EngineError, EngineResult};

/// Default per-predicate fact capacity.
pub const DEFAULT_FACT_CAPACITY: usize = 2048;

/// Default size of the re-evaluation worker pool.
pub const DEFAULT_WORKERS: usize = 4;

/// Default undelivered-notification buffer per subscription.
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 64;

/// Default poll interval for waits with no trackable dependency.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Verbose browser-observation predicates that tolerate sampling.
pub const LOW_VALUE_PREDICATES: &[&str] = &[
    "dom_node",
    "dom_attr",
    "dom_text",
    "react_prop",
    "react_state",
    "net_header",
    "input_event",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fact_capacity: usize,
    pub workers: usize,
    pub subscription_buffer: usize,
    /// Milliseconds between polls for waits that cannot be tracked by dependency.
    pub default_poll_interval_ms: u64,
    /// Predicates subject to adaptive sampling near capacity.
    pub sampled_predicates: Vec<String>,
    /// Rule source installed as built-in at construction.
    pub builtin_rules: Option<String>,
    /// File of built-in declarations and rules, loaded at construction.
    pub schema_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fact_capacity: DEFAULT_FACT_CAPACITY,
            workers: DEFAULT_WORKERS,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            default_poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            sampled_predicates: Vec::new(),
            builtin_rules: None,
            schema_path: None,
        }
    }
}

impl EngineConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.fact_capacity = capacity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_subscription_buffer(mut self, size: usize) -> Self {
        self.subscription_buffer = size;
        self
    }

    pub fn with_builtin_rules(mut self, source: impl Into<String>) -> Self {
        self.builtin_rules = Some(source.into());
        self
    }

    pub fn with_schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = Some(path.into());
        self
    }

    /// Sample the standard verbose browser predicates.
    pub fn with_low_value_sampling(mut self) -> Self {
        self.sampled_predicates = LOW_VALUE_PREDICATES.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        clamp_poll_interval(Duration::from_millis(self.default_poll_interval_ms))
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.fact_capacity == 0 {
            return Err(EngineError::Config("fact_capacity must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(EngineError::Config("workers must be positive".to_string()));
        }
        if self.subscription_buffer == 0 {
            return Err(EngineError::Config(
                "subscription_buffer must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Built-in rule sources in install order: schema file first, then inline rules.
    pub fn builtin_sources(&self) -> EngineResult<Vec<String>> {
        let mut sources = Vec::new();
        if let Some(path) = &self.schema_path {
            let text = std::fs::read_to_string(path).map_err(|e| {
                EngineError::Config(format!("cannot read schema {}: {e}", path.display()))
            })?;
            sources.push(text);
        }
        if let Some(rules) = &self.builtin_rules {
            sources.push(rules.clone());
        }
        Ok(sources)
    }
}

pub fn clamp_poll_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.fact_capacity, 2048);
        assert_eq!(config.workers, 4);
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        config.validate().unwrap();
    }

    #[test]
    fn test_poll_interval_clamped() {
        assert_eq!(clamp_poll_interval(Duration::from_millis(1)), MIN_POLL_INTERVAL);
        assert_eq!(clamp_poll_interval(Duration::from_secs(60)), MAX_POLL_INTERVAL);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(EngineConfig::default().with_capacity(0).validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"fact_capacity": 16, "sampled_predicates": ["dom_node"]}"#)
                .unwrap();
        assert_eq!(config.fact_capacity, 16);
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.sampled_predicates, vec!["dom_node".to_string()]);
    }

    #[test]
    fn test_builtin_sources_reads_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.mg");
        std::fs::write(&path, "Decl click(ref: string).").unwrap();
        let config = EngineConfig::default()
            .with_schema_path(&path)
            .with_builtin_rules("clicked(R) :- click(R).");
        let sources = config.builtin_sources().unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].starts_with("Decl"));

        let missing = EngineConfig::default().with_schema_path(dir.path().join("nope.mg"));
        assert!(matches!(missing.builtin_sources(), Err(EngineError::Config(_))));
    }
}
