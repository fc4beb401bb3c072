//! JSON-RPC envelope checks.

use crate::types::{JsonRpcRequest, McpError, McpResult, RequestId, JSONRPC_VERSION};

/// Reject requests the dispatcher cannot answer meaningfully.
pub fn validate_request(request: &JsonRpcRequest) -> McpResult<()> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(McpError::InvalidRequest(format!(
            "Expected jsonrpc version \"{JSONRPC_VERSION}\", got \"{}\"",
            request.jsonrpc
        )));
    }

    if request.method.is_empty() {
        return Err(McpError::InvalidRequest(
            "Method name must not be empty".to_string(),
        ));
    }

    // A null id could never be targeted by notifications/cancelled.
    if request.id == RequestId::Null {
        return Err(McpError::InvalidRequest(
            "Request id must be a string or number".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(jsonrpc: &str, id: RequestId, method: &str) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: jsonrpc.to_string(),
            id,
            method: method.to_string(),
            params: None,
        }
    }

    #[test]
    fn test_validate_request() {
        assert!(validate_request(&request("2.0", RequestId::Number(1), "ping")).is_ok());
        assert!(validate_request(&request("1.0", RequestId::Number(1), "ping")).is_err());
        assert!(validate_request(&request("2.0", RequestId::Number(1), "")).is_err());
        assert!(validate_request(&request("2.0", RequestId::Null, "ping")).is_err());
    }
}
