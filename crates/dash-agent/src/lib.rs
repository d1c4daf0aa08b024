//! dash-agent: single-role agent runtime with tool execution
//!
//! An [`Agent`] runs one reasoning turn: it sends a transcript to its model,
//! dispatches any requested tool calls, feeds the results back, and returns
//! the final reply once the model stops asking for tools.

pub mod agent;
pub mod error;
pub mod tool;
pub mod transport;

pub use agent::{Agent, AgentConfig, TurnOutcome};
pub use error::{Error, Result};
pub use tool::{BoxedTool, Tool, ToolResult, ToolSet};
pub use transport::{ProviderTransport, RetryConfig, RunConfig, Transport};
