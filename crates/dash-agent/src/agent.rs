//! Single-role agent turn: request, execute tools, reply

use std::collections::HashMap;
use std::sync::Arc;

use dash_ai::{Context, Message, ToolCall};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    tool::{ToolResult, ToolSet},
    transport::{RunConfig, Transport},
};

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name, used for logging
    pub name: String,
    /// Model settings for every call in a turn
    pub run: RunConfig,
    /// Maximum number of tool-executing rounds in one turn
    pub max_tool_rounds: u32,
}

/// Result of a completed turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Final natural-language reply
    pub reply: String,
    /// Number of tool calls dispatched during the turn
    pub tool_calls: u32,
    /// Number of tool calls that reported an error
    pub tool_errors: u32,
}

/// An agent bound to a model and a tool set
pub struct Agent {
    config: AgentConfig,
    tools: ToolSet,
    transport: Arc<dyn Transport>,
    /// Compiled JSON schema validators keyed by tool name
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl Agent {
    /// Create a new agent
    pub fn new(config: AgentConfig, tools: ToolSet, transport: Arc<dyn Transport>) -> Self {
        let mut schema_cache = HashMap::new();
        for tool in tools.iter() {
            let schema = tool.parameters_schema();
            match jsonschema::validator_for(&schema) {
                Ok(validator) => {
                    schema_cache.insert(tool.name().to_string(), Arc::new(validator));
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid tool parameter schema for '{}', skipping validation: {}",
                        tool.name(),
                        e
                    );
                }
            }
        }

        Self {
            config,
            tools,
            transport,
            schema_cache,
        }
    }

    /// Get the tool set
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Run one turn over the given messages.
    ///
    /// Tool failures are fed back to the model as error results and never
    /// abort the turn. Model failures and exceeding the tool round bound do.
    pub async fn run_turn(
        &self,
        messages: Vec<Message>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome> {
        let mut context = Context {
            messages,
            tools: self.tools.api_tools(),
        };
        let mut rounds = 0u32;
        let mut tool_calls = 0u32;
        let mut tool_errors = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let reply = self
                .transport
                .complete(context.clone(), &self.config.run, cancel.clone())
                .await?;
            let calls = reply.tool_calls();
            let text = reply.text();
            context.push(reply);

            if calls.is_empty() {
                return Ok(TurnOutcome {
                    reply: text,
                    tool_calls,
                    tool_errors,
                });
            }

            if rounds >= self.config.max_tool_rounds {
                return Err(Error::ToolRoundsExceeded(self.config.max_tool_rounds));
            }
            rounds += 1;

            for call in calls {
                let result = self.execute_tool_call(&call, cancel.clone()).await;
                tool_calls += 1;
                if result.is_error {
                    tool_errors += 1;
                }
                context.push(Message::tool_result(
                    call.id,
                    call.name,
                    result.content,
                    result.is_error,
                ));
            }
        }
    }

    async fn execute_tool_call(&self, call: &ToolCall, cancel: CancellationToken) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            tracing::warn!(agent = %self.config.name, tool = %call.name, "Model requested unknown tool");
            return ToolResult::error(format!("Tool not found: {}", call.name));
        };

        if let Some(err) = self
            .schema_cache
            .get(call.name.as_str())
            .and_then(|validator| validate_with_validator(&call.arguments, validator))
        {
            tracing::warn!(agent = %self.config.name, tool = %call.name, "Rejected tool arguments");
            return ToolResult::error(err);
        }

        tracing::debug!(agent = %self.config.name, tool = %call.name, "Executing tool");
        let result = tool.execute(&call.id, call.arguments.clone(), cancel).await;
        if result.is_error {
            tracing::warn!(
                agent = %self.config.name,
                tool = %call.name,
                error = %result.text_content(),
                "Tool reported an error"
            );
        }
        result
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}
