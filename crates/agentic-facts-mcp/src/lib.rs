//! AgenticFacts MCP Server — facts, rules, and blocking waits for LLM agents.

pub mod config;
pub mod protocol;
pub mod repl;
pub mod resources;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::{resolve_capacity, resolve_schema_path};
pub use protocol::ProtocolHandler;
pub use session::FactSession;
pub use transport::StdioTransport;
