//! AgenticFacts — core fact engine: bounded fact store, stratified Datalog rules, blocking waits, and edge-triggered subscriptions.

pub mod config;
mod dispatch;
pub mod engine;
pub mod eval;
pub mod rules;
pub mod store;
pub mod subscribe;
pub mod temporal;
pub mod types;
pub mod value;
pub mod wait;

pub use config::EngineConfig;
pub use engine::{Engine, EngineStats};
pub use eval::{Direction, Evaluator, QueryOptions};
pub use rules::{parse_program, parse_query, RuleOrigin, RuleRegistry, RuleSet, RuleSummary};
pub use store::{FactStore, Snapshot, StoreStats};
pub use subscribe::{CloseReason, Notification, Subscription, SubscriptionEvent, SubscriptionId};
pub use temporal::TimeWindow;
pub use types::*;
pub use value::Value;
pub use wait::{PendingWait, WaitMode, WaitOutcome, WaitRequest, WaitState};
