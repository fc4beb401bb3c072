//! Edge case integration tests for agentic-facts-mcp.
//!
//! Drives the protocol handler and the stdio transport with raw JSON-RPC,
//! across Protocol, Rules, Waits, Subscriptions, and Resources.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use agentic_facts::EngineConfig;
use agentic_facts_mcp::config::engine_config;
use agentic_facts_mcp::protocol::ProtocolHandler;
use agentic_facts_mcp::session::FactSession;
use agentic_facts_mcp::transport::{framing, StdioTransport};
use agentic_facts_mcp::types::*;

// ─────────────────────── helpers ───────────────────────

/// Session over a fresh engine with the given per-predicate capacity.
fn session_with_capacity(capacity: usize) -> Arc<FactSession> {
    Arc::new(FactSession::open(engine_config(None, capacity)).unwrap())
}

fn handler() -> ProtocolHandler {
    ProtocolHandler::new(session_with_capacity(256))
}

/// Build an MCP JSON-RPC request.
fn mcp_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

/// Build a tools/call request.
fn tool_call(id: i64, name: &str, arguments: Value) -> Value {
    mcp_request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}

/// Build an initialize request.
fn init_request() -> Value {
    mcp_request(
        0,
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }),
    )
}

/// Send a JSON-RPC message through the handler and return the response.
async fn send(handler: &ProtocolHandler, msg: Value) -> Option<Value> {
    let parsed: JsonRpcMessage = serde_json::from_value(msg).unwrap();
    handler.handle_message(parsed).await
}

/// Send and unwrap the response.
async fn send_unwrap(handler: &ProtocolHandler, msg: Value) -> Value {
    send(handler, msg).await.expect("expected response")
}

/// Decode the JSON text payload of a successful tool result.
fn tool_json(resp: &Value) -> Value {
    let text = resp["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("expected tool result, got: {resp}"));
    serde_json::from_str(text).unwrap()
}

async fn call_tool(handler: &ProtocolHandler, name: &str, arguments: Value) -> Value {
    let resp = send_unwrap(handler, tool_call(1, name, arguments)).await;
    tool_json(&resp)
}

async fn push(handler: &ProtocolHandler, facts: Value) -> Value {
    call_tool(handler, "push_facts", json!({ "facts": facts })).await
}

// ═══════════════════════════════════════════════════════
// PROTOCOL TESTS
// ═══════════════════════════════════════════════════════

/// Test 1: Malformed JSON — {"broken":
#[tokio::test]
async fn test_01_malformed_json() {
    let result = framing::parse_message(r#"{"broken":"#);
    let err = result.unwrap_err();
    assert_eq!(err.code(), -32700, "Should be PARSE_ERROR (-32700)");

    assert!(framing::parse_message("").is_err());

    let truncated = r#"{"jsonrpc":"2.0","id":1,"method":"#;
    assert!(framing::parse_message(truncated).is_err());

    // Valid JSON that is not a message at all
    let not_a_message = framing::parse_message(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
    assert_eq!(not_a_message.code(), -32600, "Should be INVALID_REQUEST");

    println!("TEST 01 — Malformed JSON: PASS");
}

/// Test 2: Unknown method and unknown tool
#[tokio::test]
async fn test_02_unknown_method_and_tool() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    let resp = send_unwrap(&handler, mcp_request(1, "facts/teleport", json!({}))).await;
    assert_eq!(resp["error"]["code"], -32601, "Should be METHOD_NOT_FOUND");

    let resp = send_unwrap(&handler, tool_call(2, "no_such_tool", json!({}))).await;
    assert_eq!(resp["error"]["code"], -32803, "Should be TOOL_NOT_FOUND");
    assert_eq!(resp["id"], 2);

    println!("TEST 02 — Unknown Method/Tool: PASS");
}

/// Test 3: Invalid params — missing or mistyped arguments
#[tokio::test]
async fn test_03_invalid_params() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    let resp = send_unwrap(&handler, tool_call(1, "query_facts", json!({}))).await;
    assert_eq!(resp["error"]["code"], -32602, "Missing pattern: INVALID_PARAMS");

    let resp = send_unwrap(&handler, tool_call(2, "push_facts", json!({ "facts": "nope" }))).await;
    assert_eq!(resp["error"]["code"], -32602, "facts must be an array");

    let resp = send_unwrap(
        &handler,
        tool_call(3, "await_conditions", json!({ "patterns": [] })),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602, "Empty AND-wait is invalid");

    let resp = send_unwrap(
        &handler,
        tool_call(
            4,
            "query_temporal",
            json!({ "predicate": "p", "after": "last tuesday" }),
        ),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602, "Bad timestamp is invalid");

    println!("TEST 03 — Invalid Params: PASS");
}

/// Test 4: Future protocol version — server answers with its own
#[tokio::test]
async fn test_04_future_protocol_version() {
    let handler = handler();
    let msg = mcp_request(
        0,
        "initialize",
        json!({
            "protocolVersion": "2099-01-01",
            "capabilities": {},
            "clientInfo": { "name": "future-client", "version": "9.0" }
        }),
    );
    let resp = send_unwrap(&handler, msg).await;
    assert_eq!(resp["result"]["protocolVersion"], MCP_VERSION);
    assert_eq!(resp["result"]["serverInfo"]["name"], SERVER_NAME);

    // Notifications are never answered
    let initialized = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    assert!(send(&handler, initialized).await.is_none());

    println!("TEST 04 — Future Protocol Version: PASS");
}

/// Test 5: Null request id is rejected
#[tokio::test]
async fn test_05_null_request_id() {
    let handler = handler();
    let msg = json!({ "jsonrpc": "2.0", "id": null, "method": "ping" });
    let resp = send_unwrap(&handler, msg).await;
    assert_eq!(resp["error"]["code"], -32600);

    println!("TEST 05 — Null Request Id: PASS");
}

// ═══════════════════════════════════════════════════════
// FACTS AND RULES TESTS
// ═══════════════════════════════════════════════════════

/// Test 6: Push then query, with per-fact rejection
#[tokio::test]
async fn test_06_push_and_query() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    let outcome = push(
        &handler,
        json!([
            { "predicate": "loaded", "args": ["/home", 200] },
            { "predicate": "loaded", "args": ["/cart", 500] },
            { "predicate": "loaded", "args": [null] },
            { "args": [1] }
        ]),
    )
    .await;
    assert_eq!(outcome["accepted"], 2);
    assert_eq!(outcome["rejected"].as_array().unwrap().len(), 2);

    let answers = call_tool(&handler, "query_facts", json!({ "pattern": "loaded(Url, 200)" })).await;
    assert_eq!(answers["count"], 1);
    assert_eq!(answers["bindings"][0]["Url"], "/home");

    // Same query twice, same answer
    let again = call_tool(&handler, "query_facts", json!({ "pattern": "loaded(Url, 200)" })).await;
    assert_eq!(answers["bindings"], again["bindings"]);

    let ordered = call_tool(
        &handler,
        "query_facts",
        json!({ "pattern": "loaded(Url, Code)", "order_by": "Code", "direction": "desc", "limit": 1 }),
    )
    .await;
    assert_eq!(ordered["count"], 1);
    assert_eq!(ordered["bindings"][0]["Code"], 500);

    println!("TEST 06 — Push and Query: PASS");
}

/// Test 7: Unsafe and unstratifiable rules are rejected with RULE_VALIDATION
#[tokio::test]
async fn test_07_rule_validation() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    let unsafe_rule = send_unwrap(
        &handler,
        tool_call(1, "submit_rule", json!({ "rule": "bad(X) :- not seen(X)." })),
    )
    .await;
    assert_eq!(unsafe_rule["error"]["code"], -32850, "Unsafe rule: {unsafe_rule}");

    let cycle = send_unwrap(
        &handler,
        tool_call(
            2,
            "submit_rule",
            json!({ "rule": "p(X) :- q(X), not r(X).\nr(X) :- q(X), not p(X)." }),
        ),
    )
    .await;
    assert_eq!(cycle["error"]["code"], -32850, "Negative cycle: {cycle}");

    let syntax = send_unwrap(
        &handler,
        tool_call(3, "submit_rule", json!({ "rule": "p(X :- q(X)." })),
    )
    .await;
    assert_eq!(syntax["error"]["code"], -32850, "Parse error: {syntax}");

    let rules = call_tool(&handler, "list_rules", json!({})).await;
    assert_eq!(rules["count"], 0, "Nothing should have been installed");

    println!("TEST 07 — Rule Validation: PASS");
}

/// Test 8: Derived predicates, evaluate_rule, and rule removal
#[tokio::test]
async fn test_08_rule_lifecycle() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    let installed = call_tool(
        &handler,
        "submit_rule",
        json!({ "rule": "ready(U) :- loaded(U, 200), not busy(U)." }),
    )
    .await;
    let rule_id = installed["rule_id"].as_u64().unwrap();
    assert_eq!(installed["heads"], json!(["ready"]));

    push(
        &handler,
        json!([
            { "predicate": "loaded", "args": ["/home", 200] },
            { "predicate": "loaded", "args": ["/cart", 200] },
            { "predicate": "busy", "args": ["/cart"] }
        ]),
    )
    .await;

    let ready = call_tool(&handler, "query_facts", json!({ "pattern": "ready(U)" })).await;
    assert_eq!(ready["count"], 1);
    assert_eq!(ready["bindings"][0]["U"], "/home");

    let holds = call_tool(&handler, "evaluate_rule", json!({ "name": "ready" })).await;
    assert_eq!(holds["holds"], true);

    let removed = call_tool(&handler, "remove_rule", json!({ "rule_id": rule_id })).await;
    assert_eq!(removed["removed"], true);

    let gone = send_unwrap(&handler, tool_call(9, "remove_rule", json!({ "rule_id": rule_id }))).await;
    assert_eq!(gone["error"]["code"], -32852, "Should be RULE_NOT_FOUND");

    let unknown = send_unwrap(&handler, tool_call(10, "query_facts", json!({ "pattern": "ready(U)" }))).await;
    assert_eq!(unknown["error"]["code"], -32851, "Unknown predicate: EVALUATION_ERROR");

    println!("TEST 08 — Rule Lifecycle: PASS");
}

/// Test 9: Eviction keeps each predicate at capacity
#[tokio::test]
async fn test_09_eviction_bound() {
    let handler = ProtocolHandler::new(session_with_capacity(4));
    send_unwrap(&handler, init_request()).await;

    let facts: Vec<Value> = (0..10)
        .map(|i| json!({ "predicate": "tick", "args": [i] }))
        .collect();
    let outcome = push(&handler, json!(facts)).await;
    assert_eq!(outcome["accepted"], 10);

    let read = call_tool(&handler, "read_facts", json!({ "predicate": "tick", "limit": 100 })).await;
    assert_eq!(read["count"], 4);
    // Newest first
    assert_eq!(read["facts"][0]["args"][0], 9);

    println!("TEST 09 — Eviction Bound: PASS");
}

/// Test 10: Temporal windows with explicit timestamps
#[tokio::test]
async fn test_10_temporal_window() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    push(
        &handler,
        json!([
            { "predicate": "click", "args": ["a"], "timestamp": 1_000 },
            { "predicate": "click", "args": ["b"], "timestamp": 2_000 },
            { "predicate": "click", "args": ["c"], "timestamp": "1970-01-01T00:00:03Z" }
        ]),
    )
    .await;

    let window = call_tool(
        &handler,
        "query_temporal",
        json!({ "predicate": "click", "after": 2_000, "before": 3_000 }),
    )
    .await;
    assert_eq!(window["count"], 2, "Bounds are inclusive: {window}");

    let open = call_tool(&handler, "query_temporal", json!({ "predicate": "click", "before": 1_500 })).await;
    assert_eq!(open["count"], 1);

    println!("TEST 10 — Temporal Window: PASS");
}

// ═══════════════════════════════════════════════════════
// WAIT TESTS
// ═══════════════════════════════════════════════════════

/// Test 11: A blocking wait is satisfied by a concurrent push
#[tokio::test]
async fn test_11_await_fact_concurrent_push() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    let waiter = handler.clone();
    let wait = tokio::spawn(async move {
        send_unwrap(
            &waiter,
            tool_call(
                20,
                "await_fact",
                json!({ "pattern": "page_loaded(Url)", "timeout_ms": 5000 }),
            ),
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    push(&handler, json!([{ "predicate": "page_loaded", "args": ["/done"] }])).await;

    let resp = wait.await.unwrap();
    assert_eq!(resp["id"], 20);
    let outcome = tool_json(&resp);
    assert_eq!(outcome["status"], "satisfied", "got {outcome}");
    assert_eq!(outcome["bindings"][0]["Url"], "/done");

    println!("TEST 11 — Await Fact (concurrent push): PASS");
}

/// Test 12: AND-wait times out when one condition never holds
#[tokio::test]
async fn test_12_await_conditions_timeout() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    push(&handler, json!([{ "predicate": "logged_in", "args": ["ann"] }])).await;

    let outcome = call_tool(
        &handler,
        "await_conditions",
        json!({ "patterns": ["logged_in(U)", "has_cart(U)"], "timeout_ms": 200 }),
    )
    .await;
    assert_eq!(outcome["status"], "timed_out");
    assert!(outcome["elapsed_ms"].as_u64().unwrap() >= 200);

    let stats = handler.session().engine().stats();
    assert_eq!(stats.pending_waits, 0, "Timed-out wait must deregister");

    println!("TEST 12 — AND-wait Timeout: PASS");
}

/// Test 13: notifications/cancelled ends a blocking wait early
#[tokio::test]
async fn test_13_cancel_in_flight_wait() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    let waiter = handler.clone();
    let wait = tokio::spawn(async move {
        send_unwrap(
            &waiter,
            tool_call(
                42,
                "wait_for_condition",
                json!({ "pattern": "never_happens(_)", "timeout_ms": 30000 }),
            ),
        )
        .await
    });

    // Wait until the request is registered
    for _ in 0..100 {
        if handler.in_flight().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": { "requestId": 42, "reason": "user aborted" }
    });
    assert!(send(&handler, cancel).await.is_none());

    let resp = tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("cancelled wait should return promptly")
        .unwrap();
    let outcome = tool_json(&resp);
    assert_eq!(outcome["status"], "cancelled");
    assert_eq!(handler.in_flight().await, 0);
    assert_eq!(handler.session().engine().stats().pending_waits, 0);

    println!("TEST 13 — Cancel In-flight Wait: PASS");
}

// ═══════════════════════════════════════════════════════
// SUBSCRIPTION TESTS
// ═══════════════════════════════════════════════════════

/// Test 14: Subscribe, observe a change, unsubscribe
#[tokio::test]
async fn test_14_subscription_flow() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    let sub = call_tool(&handler, "subscribe_rule", json!({ "pattern": "alert(Level)" })).await;
    let id = sub["subscription_id"].as_u64().unwrap();

    // Nothing yet
    let empty = call_tool(&handler, "poll_subscription", json!({ "subscription_id": id })).await;
    assert_eq!(empty["events"].as_array().unwrap().len(), 0);

    push(&handler, json!([{ "predicate": "alert", "args": ["high"] }])).await;

    let polled = call_tool(
        &handler,
        "poll_subscription",
        json!({ "subscription_id": id, "wait_ms": 2000 }),
    )
    .await;
    let events = polled["events"].as_array().unwrap();
    assert_eq!(events.len(), 1, "got {polled}");
    assert_eq!(events[0]["event"], "changed");
    assert_eq!(events[0]["bindings"][0]["Level"], "high");
    assert_eq!(polled["lossy"], false);

    let closed = call_tool(&handler, "unsubscribe_rule", json!({ "subscription_id": id })).await;
    assert_eq!(closed["unsubscribed"], true);
    let again = call_tool(&handler, "unsubscribe_rule", json!({ "subscription_id": id })).await;
    assert_eq!(again["unsubscribed"], false, "Unsubscribe is idempotent");

    let missing = send_unwrap(
        &handler,
        tool_call(5, "poll_subscription", json!({ "subscription_id": id })),
    )
    .await;
    assert_eq!(missing["error"]["code"], -32853, "Should be SUBSCRIPTION_NOT_FOUND");

    println!("TEST 14 — Subscription Flow: PASS");
}

/// Test 15: Shutdown closes open subscriptions
#[tokio::test]
async fn test_15_shutdown() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;

    call_tool(&handler, "subscribe_rule", json!({ "pattern": "alert(L)" })).await;
    let resp = send_unwrap(&handler, mcp_request(7, "shutdown", json!({}))).await;
    assert!(resp.get("result").is_some());

    assert!(handler.session().engine().is_shut_down());
    assert_eq!(handler.session().subscription_count().await, 0);

    println!("TEST 15 — Shutdown: PASS");
}

// ═══════════════════════════════════════════════════════
// RESOURCE AND CONFIG TESTS
// ═══════════════════════════════════════════════════════

/// Test 16: Resources list and read
#[tokio::test]
async fn test_16_resources() {
    let handler = handler();
    send_unwrap(&handler, init_request()).await;
    push(&handler, json!([{ "predicate": "seen", "args": [1] }])).await;

    let list = send_unwrap(&handler, mcp_request(1, "resources/list", json!({}))).await;
    assert_eq!(list["result"]["resources"].as_array().unwrap().len(), 3);

    let stats = send_unwrap(
        &handler,
        mcp_request(2, "resources/read", json!({ "uri": "facts://stats" })),
    )
    .await;
    let text = stats["result"]["contents"][0]["text"].as_str().unwrap();
    let parsed: Value = serde_json::from_str(text).unwrap();
    assert_eq!(parsed["engine"]["store"]["total_facts"], 1);

    let predicate = send_unwrap(
        &handler,
        mcp_request(3, "resources/read", json!({ "uri": "facts://predicate/seen" })),
    )
    .await;
    let text = predicate["result"]["contents"][0]["text"].as_str().unwrap();
    let parsed: Value = serde_json::from_str(text).unwrap();
    assert_eq!(parsed["count"], 1);

    let missing = send_unwrap(
        &handler,
        mcp_request(4, "resources/read", json!({ "uri": "facts://nowhere" })),
    )
    .await;
    assert_eq!(missing["error"]["code"], -32802);

    println!("TEST 16 — Resources: PASS");
}

/// Test 17: Schema file rules are installed as built-ins
#[tokio::test]
async fn test_17_schema_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema.mg");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "Decl loaded(url: string, code: number).").unwrap();
    writeln!(file, "ok(U) :- loaded(U, 200).").unwrap();
    drop(file);

    let session = Arc::new(FactSession::open(engine_config(Some(path), 64)).unwrap());
    let handler = ProtocolHandler::new(session);
    send_unwrap(&handler, init_request()).await;

    let rules = call_tool(&handler, "list_rules", json!({})).await;
    assert_eq!(rules["count"], 1);
    assert_eq!(rules["rules"][0]["origin"], "builtin");

    // Declared arity is enforced per fact
    let outcome = push(
        &handler,
        json!([
            { "predicate": "loaded", "args": ["/a", 200] },
            { "predicate": "loaded", "args": ["/b"] }
        ]),
    )
    .await;
    assert_eq!(outcome["accepted"], 1);
    assert_eq!(outcome["rejected"][0]["reason"]["kind"], "arity_mismatch");

    // A missing schema file fails startup
    let missing = EngineConfig::default().with_schema_path(dir.path().join("nope.mg"));
    assert!(FactSession::open(missing).is_err());

    println!("TEST 17 — Schema File: PASS");
}

// ═══════════════════════════════════════════════════════
// TRANSPORT TESTS
// ═══════════════════════════════════════════════════════

/// Test 18: Stdio transport serves a wait and the push that satisfies it
/// on the same connection
#[tokio::test]
async fn test_18_stdio_concurrency() {
    let transport = StdioTransport::new(handler());
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let serving = tokio::spawn(async move { transport.run_on(server_read, server_write).await });

    let (client_read, mut client_write) = tokio::io::split(client);
    let mut lines = BufReader::new(client_read).lines();

    let wait = tool_call(1, "await_fact", json!({ "pattern": "done(X)", "timeout_ms": 5000 }));
    let push_msg = tool_call(
        2,
        "push_facts",
        json!({ "facts": [{ "predicate": "done", "args": [true] }] }),
    );
    for msg in [wait, push_msg] {
        let line = format!("{msg}\n");
        client_write.write_all(line.as_bytes()).await.unwrap();
    }
    client_write.write_all(b"{garbage\n").await.unwrap();

    let mut seen = std::collections::HashMap::new();
    while seen.len() < 3 {
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("response in time")
            .unwrap()
            .expect("line");
        let value: Value = serde_json::from_str(&line).unwrap();
        seen.insert(value["id"].to_string(), value);
    }

    assert_eq!(tool_json(&seen["2"])["accepted"], 1);
    assert_eq!(tool_json(&seen["1"])["status"], "satisfied");
    assert_eq!(seen["null"]["error"]["code"], -32700);

    client_write.shutdown().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("transport stops on EOF")
        .unwrap();
    assert!(result.is_ok());

    println!("TEST 18 — Stdio Concurrency: PASS");
}
