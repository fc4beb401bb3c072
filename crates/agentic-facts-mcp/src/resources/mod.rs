//! MCP resource implementations.

pub mod facts;
pub mod registry;
pub mod stats;
pub mod templates;

pub use registry::ResourceRegistry;
