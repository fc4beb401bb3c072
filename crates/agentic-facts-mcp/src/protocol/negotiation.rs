//! Protocol version and capability negotiation during initialization.

use crate::types::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, McpResult,
    MCP_VERSION,
};

/// Protocol revisions this server can speak, newest last.
pub const SUPPORTED_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26"];

/// What the client announced, kept for the lifetime of the connection.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedCapabilities {
    pub client: ClientCapabilities,
    pub client_info: Option<Implementation>,
    pub protocol_version: Option<String>,
    pub initialized: bool,
}

impl NegotiatedCapabilities {
    /// Echo the client's revision when supported, otherwise answer with ours
    /// and let the client decide whether to continue.
    pub fn negotiate(&mut self, params: InitializeParams) -> McpResult<InitializeResult> {
        let mut result = InitializeResult::default_result();
        if SUPPORTED_VERSIONS.contains(&params.protocol_version.as_str()) {
            result.protocol_version = params.protocol_version.clone();
        } else {
            tracing::warn!(
                "Client requested protocol version {}, answering with {}",
                params.protocol_version,
                MCP_VERSION
            );
        }

        tracing::info!(
            "Initialized with client: {} v{}",
            params.client_info.name,
            params.client_info.version
        );

        self.client = params.capabilities;
        self.client_info = Some(params.client_info);
        self.protocol_version = Some(result.protocol_version.clone());
        Ok(result)
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
        tracing::info!("MCP handshake complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(version: &str) -> InitializeParams {
        InitializeParams {
            protocol_version: version.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "test".to_string(),
                version: "1.0".to_string(),
            },
        }
    }

    #[test]
    fn test_supported_version_is_echoed() {
        let mut caps = NegotiatedCapabilities::default();
        let result = caps.negotiate(params("2025-03-26")).unwrap();
        assert_eq!(result.protocol_version, "2025-03-26");
        assert_eq!(caps.protocol_version.as_deref(), Some("2025-03-26"));
    }

    #[test]
    fn test_unknown_version_falls_back() {
        let mut caps = NegotiatedCapabilities::default();
        let result = caps.negotiate(params("2099-01-01")).unwrap();
        assert_eq!(result.protocol_version, MCP_VERSION);
        assert!(!caps.initialized);
        caps.mark_initialized();
        assert!(caps.initialized);
    }
}
