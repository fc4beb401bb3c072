//! Core data types for facts, bindings, and engine errors.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Producer tag used when a pushed fact names no origin.
pub const DEFAULT_ORIGIN: &str = "client";

/// A stored observation. Immutable once accepted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: String,
    pub args: Vec<Value>,
    pub timestamp: DateTime<Utc>,
    pub origin: String,
    /// Global arrival sequence assigned by the store.
    pub seq: u64,
}

/// A fact as pushed by a producer, before the store stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactInput {
    pub predicate: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub origin: Option<String>,
}

impl FactInput {
    pub fn new(predicate: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
            timestamp: None,
            origin: None,
        }
    }

    /// Pin the observation time instead of taking the arrival time.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn from_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Variable name to value, as produced by a query.
pub type Binding = BTreeMap<String, Value>;

/// Result of a batch push. Batches are never atomic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PushOutcome {
    pub accepted: usize,
    pub rejected: Vec<RejectedFact>,
}

/// A pushed fact the store refused, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedFact {
    pub fact: FactInput,
    pub reason: RejectReason,
}

/// Why an individual fact was refused.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("empty predicate name")]
    EmptyPredicate,

    #[error("declared arity is {expected}, got {found} arguments")]
    ArityMismatch { expected: usize, found: usize },

    #[error("argument {position} must be {expected}, got {found}")]
    TypeMismatch {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("malformed fact: {message}")]
    Malformed { message: String },

    #[error("dropped by adaptive sampling")]
    Sampled,
}

/// Identifier shared by every clause of one rule submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Syntax error in rule or query text.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// A rule submission that parses but cannot be installed.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unsafe rule `{rule}`: variable {variable} {context}")]
    Unsafe {
        rule: String,
        variable: String,
        context: String,
    },

    #[error("rule `{rule}` is not stratifiable: {predicate} depends on itself through negation or aggregation")]
    Unstratifiable { rule: String, predicate: String },

    #[error("arity mismatch for {predicate}: expected {expected}, found {found} in `{rule}`")]
    ArityMismatch {
        predicate: String,
        expected: usize,
        found: usize,
        rule: String,
    },

    #[error("conflicting declaration for {predicate}")]
    ConflictingDecl { predicate: String },
}

/// Failure while evaluating a query. Local to the call that hit it.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("unknown predicate: {0}")]
    UnknownPredicate(String),

    #[error("malformed pattern: {0}")]
    MalformedPattern(String),

    #[error("division by zero in `{0}`")]
    DivisionByZero(String),

    #[error("non-numeric operand {value} in `{expr}`")]
    NonNumeric { expr: String, value: String },

    #[error("arithmetic overflow in `{0}`")]
    Overflow(String),

    #[error("cannot aggregate {value} with {function}")]
    Aggregation { function: String, value: String },
}

/// Errors that can occur in the fact engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Rule not found: {0}")]
    RuleNotFound(RuleId),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type EngineResult<T> = Result<T, EngineError>;
