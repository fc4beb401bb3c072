//! Argument decoding shared by the tools.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use agentic_facts::{FactInput, RejectReason, RejectedFact};

use crate::types::{McpError, McpResult};

/// Default wait timeout for the blocking tools.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

pub fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

pub fn parse_args<T: DeserializeOwned>(args: Value) -> McpResult<T> {
    serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))
}

/// A point in time: milliseconds since the epoch or RFC 3339 text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeArg {
    Millis(i64),
    Text(String),
}

impl TimeArg {
    pub fn resolve(&self) -> Result<DateTime<Utc>, String> {
        match self {
            TimeArg::Millis(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .ok_or_else(|| format!("timestamp out of range: {ms}")),
            TimeArg::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("invalid timestamp {text:?}: {e}")),
        }
    }
}

pub fn resolve_time(arg: Option<&TimeArg>, field: &str) -> McpResult<Option<DateTime<Utc>>> {
    arg.map(|t| {
        t.resolve()
            .map_err(|e| McpError::InvalidParams(format!("{field}: {e}")))
    })
    .transpose()
}

#[derive(Debug, Deserialize)]
struct RawFact {
    predicate: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    timestamp: Option<TimeArg>,
    #[serde(default)]
    origin: Option<String>,
}

/// Decode one pushed fact. A fact that cannot be decoded is rejected on
/// its own rather than failing the batch.
pub fn decode_fact(raw: Value) -> Result<FactInput, RejectedFact> {
    let predicate = raw
        .get("predicate")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let malformed = |message: String| RejectedFact {
        fact: FactInput::new(predicate.clone(), Vec::new()),
        reason: RejectReason::Malformed { message },
    };

    let fact: RawFact = serde_json::from_value(raw).map_err(|e| malformed(e.to_string()))?;
    let args = fact
        .args
        .iter()
        .map(agentic_facts::Value::from_json)
        .collect::<Result<Vec<_>, _>>()
        .map_err(malformed)?;

    let mut input = FactInput::new(fact.predicate, args);
    if let Some(timestamp) = &fact.timestamp {
        input = input.at(timestamp.resolve().map_err(malformed)?);
    }
    if let Some(origin) = fact.origin {
        input = input.from_origin(origin);
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_time_arg_forms() {
        let millis: TimeArg = serde_json::from_value(json!(1_700_000_000_000i64)).unwrap();
        let text: TimeArg = serde_json::from_value(json!("2023-11-14T22:13:20Z")).unwrap();
        assert_eq!(millis.resolve().unwrap(), text.resolve().unwrap());
        let bad: TimeArg = serde_json::from_value(json!("yesterday")).unwrap();
        assert!(bad.resolve().is_err());
    }

    #[test]
    fn test_decode_fact() {
        let fact = decode_fact(json!({
            "predicate": "user_click",
            "args": ["#buy", 3, true],
            "origin": "dom",
            "timestamp": 1_700_000_000_000i64
        }))
        .unwrap();
        assert_eq!(fact.args.len(), 3);
        assert_eq!(fact.args[0], agentic_facts::Value::String("#buy".to_string()));
        assert_eq!(fact.origin.as_deref(), Some("dom"));
        assert!(fact.timestamp.is_some());
    }

    #[test]
    fn test_decode_fact_rejects_null_argument() {
        let rejected = decode_fact(json!({ "predicate": "p", "args": [null] })).unwrap_err();
        assert_eq!(rejected.fact.predicate, "p");
        assert!(matches!(rejected.reason, RejectReason::Malformed { .. }));
        assert!(decode_fact(json!({ "args": [] })).is_err());
    }
}
