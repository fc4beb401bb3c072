//! Tool registration and dispatch.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::session::FactSession;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::{
    await_conditions, await_fact, evaluate_rule, list_rules, poll_subscription, push_facts,
    query_facts, query_temporal, read_facts, remove_rule, submit_rule, subscribe_rule,
    unsubscribe_rule, wait_for_condition,
};

pub struct ToolRegistry;

impl ToolRegistry {
    pub fn list_tools() -> Vec<ToolDefinition> {
        vec![
            push_facts::definition(),
            read_facts::definition(),
            query_facts::definition(),
            query_temporal::definition(),
            submit_rule::definition(),
            remove_rule::definition(),
            list_rules::definition(),
            evaluate_rule::definition(),
            await_fact::definition(),
            await_conditions::definition(),
            wait_for_condition::definition(),
            subscribe_rule::definition(),
            poll_subscription::definition(),
            unsubscribe_rule::definition(),
        ]
    }

    /// Run a tool. `cancel` fires when the client cancels the request or
    /// the server shuts down; only the blocking tools observe it.
    pub async fn call(
        name: &str,
        arguments: Option<Value>,
        session: &Arc<FactSession>,
        cancel: CancellationToken,
    ) -> McpResult<ToolCallResult> {
        let args = arguments.unwrap_or(Value::Object(serde_json::Map::new()));

        match name {
            "push_facts" => push_facts::execute(args, session).await,
            "read_facts" => read_facts::execute(args, session).await,
            "query_facts" => query_facts::execute(args, session).await,
            "query_temporal" => query_temporal::execute(args, session).await,
            "submit_rule" => submit_rule::execute(args, session).await,
            "remove_rule" => remove_rule::execute(args, session).await,
            "list_rules" => list_rules::execute(args, session).await,
            "evaluate_rule" => evaluate_rule::execute(args, session).await,
            "await_fact" => await_fact::execute(args, session, cancel).await,
            "await_conditions" => await_conditions::execute(args, session, cancel).await,
            "wait_for_condition" => wait_for_condition::execute(args, session, cancel).await,
            "subscribe_rule" => subscribe_rule::execute(args, session).await,
            "poll_subscription" => poll_subscription::execute(args, session).await,
            "unsubscribe_rule" => unsubscribe_rule::execute(args, session).await,
            _ => Err(McpError::ToolNotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tool_names_are_unique() {
        let tools = ToolRegistry::list_tools();
        let names: HashSet<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names.len(), tools.len());
        assert_eq!(tools.len(), 14);
    }

    #[test]
    fn test_schemas_are_objects() {
        for tool in ToolRegistry::list_tools() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }
}
