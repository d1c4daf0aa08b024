//! Scripted transports and tools shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dash_agent::{Agent, AgentConfig, RunConfig, Tool, ToolResult, ToolSet, Transport};
use dash_ai::{AssistantMetadata, Content, Context, Message, Model, Provider};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::member::Member;
use crate::role::Role;

/// Transport returning canned replies in order, then `fallback` forever.
pub struct ScriptedTransport {
    replies: Mutex<Vec<dash_ai::Result<Message>>>,
    fallback: String,
    pub seen: Mutex<Vec<Context>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<dash_ai::Result<Message>>, fallback: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            fallback: fallback.to_string(),
            seen: Mutex::new(vec![]),
        })
    }

    /// Text replies only
    pub fn texts(replies: &[&str], fallback: &str) -> Arc<Self> {
        Self::new(
            replies.iter().map(|r| Ok(Message::assistant(*r))).collect(),
            fallback,
        )
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn complete(
        &self,
        context: Context,
        _config: &RunConfig,
        _cancel: CancellationToken,
    ) -> dash_ai::Result<Message> {
        self.seen.lock().push(context);
        let mut replies = self.replies.lock();
        if replies.is_empty() {
            Ok(Message::assistant(self.fallback.clone()))
        } else {
            replies.remove(0)
        }
    }
}

/// An assistant message requesting one tool call
pub fn tool_call(name: &str, args: serde_json::Value) -> Message {
    Message::Assistant {
        content: vec![Content::tool_call("call_1", name, args)],
        metadata: AssistantMetadata::default(),
    }
}

/// A `read_query` tool that returns `output` or fails with it
pub struct QueryTool {
    pub output: String,
    pub fail: bool,
    pub calls: AtomicU32,
}

impl QueryTool {
    pub fn ok(output: &str) -> Arc<Self> {
        Arc::new(Self {
            output: output.into(),
            fail: false,
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(error: &str) -> Arc<Self> {
        Arc::new(Self {
            output: error.into(),
            fail: true,
            calls: AtomicU32::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Tool for QueryTool {
    fn name(&self) -> &str {
        "read_query"
    }
    fn description(&self) -> &str {
        "Run a read-only SQL query"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }
    async fn execute(
        &self,
        _tool_call_id: &str,
        _arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            ToolResult::error(format!("Error executing MCP tool: {}", self.output))
        } else {
            ToolResult::text(self.output.clone())
        }
    }
}

pub fn run_config() -> RunConfig {
    RunConfig::new(Model::new(Provider::OpenRouter, "test-model"))
}

/// A member node over a scripted transport
pub fn member(role: Role, transport: Arc<ScriptedTransport>, tools: ToolSet) -> Member {
    let config = AgentConfig {
        name: role.name().to_string(),
        run: run_config(),
        max_tool_rounds: 3,
    };
    Member::new(role, Agent::new(config, tools, transport))
}
