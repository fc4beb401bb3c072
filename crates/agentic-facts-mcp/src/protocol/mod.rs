//! MCP protocol handling — JSON-RPC dispatch and request cancellation.

pub mod handler;
pub mod negotiation;
pub mod validator;

pub use handler::ProtocolHandler;
