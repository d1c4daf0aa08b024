//! Tool trait, tool results and immutable tool sets

use async_trait::async_trait;
use dash_ai::Content;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content to return to the model
    pub content: Vec<Content>,
    /// Whether the execution resulted in an error
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
        }
    }

    /// Get the text content as a single string
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Trait for executable tools.
///
/// Implementations must not panic or return transport errors to the caller:
/// every failure is reported as a [`ToolResult::error`] so the model can see
/// it and adjust.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments
    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to a dash_ai::Tool for API calls
pub fn to_api_tool(tool: &dyn Tool) -> dash_ai::Tool {
    dash_ai::Tool {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// An immutable, cheaply cloneable collection of tools.
///
/// Built once when the tool provider is initialized and handed to each
/// agent that should see it. Later tools with a duplicate name are dropped.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Arc<[BoxedTool]>,
}

impl ToolSet {
    /// Create a tool set, keeping the first tool for each name
    pub fn new(tools: Vec<BoxedTool>) -> Self {
        let mut unique: Vec<BoxedTool> = Vec::with_capacity(tools.len());
        for tool in tools {
            if unique.iter().any(|t| t.name() == tool.name()) {
                tracing::warn!(tool = %tool.name(), "Duplicate tool name, keeping the first");
                continue;
            }
            unique.push(tool);
        }
        Self {
            tools: unique.into(),
        }
    }

    /// An empty tool set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Tool names in declaration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Iterate over the tools
    pub fn iter(&self) -> impl Iterator<Item = &BoxedTool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// API declarations for every tool
    pub fn api_tools(&self) -> Vec<dash_ai::Tool> {
        self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
