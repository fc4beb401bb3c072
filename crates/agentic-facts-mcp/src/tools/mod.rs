//! MCP tool implementations.

pub mod await_conditions;
pub mod await_fact;
pub mod encoding;
pub mod evaluate_rule;
pub mod list_rules;
pub mod poll_subscription;
pub mod push_facts;
pub mod query_facts;
pub mod query_temporal;
pub mod read_facts;
pub mod registry;
pub mod remove_rule;
pub mod submit_rule;
pub mod subscribe_rule;
pub mod unsubscribe_rule;
pub mod wait_for_condition;

pub use registry::ToolRegistry;
