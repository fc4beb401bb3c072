//! HTTP transport — JSON-RPC over POST /mcp with optional bearer auth, and /health.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json as AxumJson, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

use crate::protocol::ProtocolHandler;
use crate::types::{error_codes, mcp_error_codes, McpError, McpResult};

/// Shared server state passed to all handlers via axum State.
pub struct ServerState {
    pub token: Option<String>,
    pub handler: ProtocolHandler,
}

/// HTTP transport for web-based MCP clients.
pub struct SseTransport {
    state: Arc<ServerState>,
}

impl SseTransport {
    pub fn new(handler: ProtocolHandler, token: Option<String>) -> Self {
        Self {
            state: Arc::new(ServerState { token, handler }),
        }
    }

    /// Run the HTTP server on the given address until ctrl-c.
    pub async fn run(&self, addr: &str) -> McpResult<()> {
        let state = self.state.clone();

        let app = Router::new()
            .route("/mcp", post(handle_request))
            .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
            .route("/health", get(handle_health))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(McpError::Io)?;

        tracing::info!("HTTP transport listening on {addr}");

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Interrupt received, stopping HTTP transport");
            })
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        state.handler.cancel_all().await;
        state.handler.session().shutdown().await;
        Ok(())
    }
}

fn rpc_error(status: StatusCode, code: i32, message: &str) -> Response {
    (
        status,
        AxumJson(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": { "code": code, "message": message }
        })),
    )
        .into_response()
}

/// Checks the bearer token when one is configured.
/// /health is routed outside this layer.
async fn auth_layer(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    if let Some(expected) = &state.token {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected);

        if !authorized {
            return rpc_error(
                StatusCode::UNAUTHORIZED,
                mcp_error_codes::UNAUTHORIZED,
                "Unauthorized",
            );
        }
    }

    next.run(request).await
}

async fn handle_request(
    State(state): State<Arc<ServerState>>,
    AxumJson(body): AxumJson<Value>,
) -> Result<AxumJson<Value>, Response> {
    let msg: crate::types::JsonRpcMessage = serde_json::from_value(body).map_err(|_| {
        rpc_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_REQUEST,
            "Invalid request",
        )
    })?;

    match state.handler.handle_message(msg).await {
        Some(response) => Ok(AxumJson(response)),
        None => Ok(AxumJson(Value::Null)),
    }
}

/// Health check endpoint — no auth required.
async fn handle_health(State(state): State<Arc<ServerState>>) -> AxumJson<Value> {
    let stats = state.handler.session().engine().stats();
    AxumJson(json!({
        "status": if state.handler.session().engine().is_shut_down() { "stopped" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "facts": stats.store.total_facts,
        "rules": stats.rules,
        "pending_waits": stats.pending_waits,
    }))
}
