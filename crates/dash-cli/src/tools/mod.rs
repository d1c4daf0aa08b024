//! Tool providers for the research team

mod mcp;

pub use mcp::McpToolProvider;
