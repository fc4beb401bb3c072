//! Main request dispatcher — receives JSON-RPC messages, routes to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::resources::ResourceRegistry;
use crate::session::FactSession;
use crate::tools::ToolRegistry;
use crate::types::*;

use super::negotiation::NegotiatedCapabilities;
use super::validator::validate_request;

/// Dispatches incoming JSON-RPC messages.
///
/// Cheap to clone; clones share the session, the negotiated capabilities,
/// and the table of in-flight requests, so transports can run one task per
/// request.
#[derive(Clone)]
pub struct ProtocolHandler {
    session: Arc<FactSession>,
    capabilities: Arc<Mutex<NegotiatedCapabilities>>,
    in_flight: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl ProtocolHandler {
    pub fn new(session: Arc<FactSession>) -> Self {
        Self {
            session,
            capabilities: Arc::new(Mutex::new(NegotiatedCapabilities::default())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn session(&self) -> &Arc<FactSession> {
        &self.session
    }

    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<Value> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif).await;
                None
            }
            _ => {
                tracing::warn!("Received unexpected message type from client");
                None
            }
        }
    }

    /// Number of requests currently being served.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Cancel every in-flight request. Blocking tools return a cancelled
    /// outcome promptly.
    pub async fn cancel_all(&self) {
        self.shutdown.cancel();
        let pending = self.in_flight.lock().await.len();
        if pending > 0 {
            tracing::info!("Cancelling {pending} in-flight requests");
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Value {
        let cancel = self.track(&request).await;
        self.serve(request, cancel).await
    }

    /// Register a request as in flight and return its cancellation token.
    ///
    /// Transports that serve requests on separate tasks call this before
    /// spawning, so a `notifications/cancelled` read right after the request
    /// always finds it.
    pub async fn track(&self, request: &JsonRpcRequest) -> CancellationToken {
        let cancel = self.shutdown.child_token();
        self.in_flight
            .lock()
            .await
            .insert(request.id.clone(), cancel.clone());
        cancel
    }

    /// Answer a request registered with [`track`](Self::track).
    pub async fn serve(&self, request: JsonRpcRequest, cancel: CancellationToken) -> Value {
        let id = request.id.clone();
        let result = match validate_request(&request) {
            Ok(()) => self.dispatch_request(&request, cancel).await,
            Err(e) => Err(e),
        };
        self.in_flight.lock().await.remove(&id);

        match result {
            Ok(value) => serde_json::to_value(JsonRpcResponse::new(id, value)).unwrap_or_default(),
            Err(e) => serde_json::to_value(e.to_json_rpc_error(id)).unwrap_or_default(),
        }
    }

    async fn dispatch_request(
        &self,
        request: &JsonRpcRequest,
        cancel: CancellationToken,
    ) -> McpResult<Value> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params.clone()).await,
            "shutdown" => self.handle_shutdown().await,

            "tools/list" => self.handle_tools_list().await,
            "tools/call" => self.handle_tools_call(request.params.clone(), cancel).await,

            "resources/list" => self.handle_resources_list().await,
            "resources/templates/list" => self.handle_resource_templates_list().await,
            "resources/read" => self.handle_resources_read(request.params.clone()).await,

            "ping" => Ok(Value::Object(serde_json::Map::new())),

            _ => Err(McpError::MethodNotFound(request.method.clone())),
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "initialized" | "notifications/initialized" => {
                self.capabilities.lock().await.mark_initialized();
            }
            "notifications/cancelled" | "$/cancelRequest" => {
                self.handle_cancelled(notification.params).await;
            }
            _ => {
                tracing::debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    async fn handle_cancelled(&self, params: Option<Value>) {
        let params: CancelledParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            _ => {
                tracing::warn!("Ignoring cancellation without a requestId");
                return;
            }
        };
        let Some(id) = RequestId::from_json(&params.request_id) else {
            tracing::warn!("Ignoring cancellation with id {}", params.request_id);
            return;
        };

        match self.in_flight.lock().await.get(&id) {
            Some(token) => {
                tracing::info!(
                    "Cancelling request {id}: {}",
                    params.reason.as_deref().unwrap_or("no reason given")
                );
                token.cancel();
            }
            None => tracing::debug!("Cancellation for request {id} that is not in flight"),
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let init_params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Initialize params required".to_string()))?;

        let mut caps = self.capabilities.lock().await;
        let result = caps.negotiate(init_params)?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_shutdown(&self) -> McpResult<Value> {
        tracing::info!("Shutdown requested");
        self.cancel_all().await;
        self.session.shutdown().await;
        Ok(Value::Object(serde_json::Map::new()))
    }

    async fn handle_tools_list(&self) -> McpResult<Value> {
        let result = ToolListResult {
            tools: ToolRegistry::list_tools(),
            next_cursor: None,
        };
        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_tools_call(
        &self,
        params: Option<Value>,
        cancel: CancellationToken,
    ) -> McpResult<Value> {
        let call_params: ToolCallParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Tool call params required".to_string()))?;

        let result = ToolRegistry::call(
            &call_params.name,
            call_params.arguments,
            &self.session,
            cancel,
        )
        .await?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_resources_list(&self) -> McpResult<Value> {
        let result = ResourceListResult {
            resources: ResourceRegistry::list_resources(),
            next_cursor: None,
        };
        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_resource_templates_list(&self) -> McpResult<Value> {
        let result = ResourceTemplateListResult {
            resource_templates: ResourceRegistry::list_templates(),
            next_cursor: None,
        };
        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_resources_read(&self, params: Option<Value>) -> McpResult<Value> {
        let read_params: ResourceReadParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Resource read params required".to_string()))?;

        let result = ResourceRegistry::read(&read_params.uri, &self.session).await?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }
}
