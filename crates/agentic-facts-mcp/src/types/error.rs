//! Error types and JSON-RPC error codes for the MCP server.

use agentic_facts::EngineError;

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId, JSONRPC_VERSION};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP and fact-engine error codes.
pub mod mcp_error_codes {
    pub const REQUEST_CANCELLED: i32 = -32800;
    pub const RESOURCE_NOT_FOUND: i32 = -32802;
    pub const TOOL_NOT_FOUND: i32 = -32803;
    /// Rule or pattern text failed to parse, or a rule failed validation.
    pub const RULE_VALIDATION: i32 = -32850;
    pub const EVALUATION_ERROR: i32 = -32851;
    pub const RULE_NOT_FOUND: i32 = -32852;
    pub const SUBSCRIPTION_NOT_FOUND: i32 = -32853;

    /// Missing or invalid bearer token on the HTTP transport.
    pub const UNAUTHORIZED: i32 = -32900;
}

#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Rule validation failed: {0}")]
    RuleValidation(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(u64),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unauthorized")]
    Unauthorized,
}

impl McpError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => INVALID_PARAMS,
            McpError::InternalError(_) => INTERNAL_ERROR,
            McpError::RequestCancelled => REQUEST_CANCELLED,
            McpError::ResourceNotFound(_) => RESOURCE_NOT_FOUND,
            McpError::ToolNotFound(_) => TOOL_NOT_FOUND,
            McpError::RuleValidation(_) => RULE_VALIDATION,
            McpError::Evaluation(_) => EVALUATION_ERROR,
            McpError::RuleNotFound(_) => RULE_NOT_FOUND,
            McpError::SubscriptionNotFound(_) => SUBSCRIPTION_NOT_FOUND,
            McpError::Transport(_) | McpError::Io(_) => INTERNAL_ERROR,
            McpError::Json(_) => PARSE_ERROR,
            McpError::Unauthorized => UNAUTHORIZED,
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code: self.code(),
                message: self.to_string(),
                data: None,
            },
        }
    }
}

impl From<EngineError> for McpError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Parse(e) => McpError::RuleValidation(e.to_string()),
            EngineError::Validation(e) => McpError::RuleValidation(e.to_string()),
            EngineError::Evaluation(e) => McpError::Evaluation(e.to_string()),
            EngineError::RuleNotFound(id) => McpError::RuleNotFound(id.0),
            EngineError::Config(message) => McpError::InternalError(message),
            EngineError::Io(e) => McpError::Io(e),
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;
