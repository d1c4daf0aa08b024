//! MCP-backed tools: each configured server runs as a stdio child process
//! and its tools are exposed to the agents that list it.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use dash_agent::{BoxedTool, Tool, ToolResult, ToolSet};
use dash_team::Role;
use rmcp::model::{CallToolRequestParam, ClientInfo, ReadResourceRequestParams, ResourceContents};
use rmcp::service::{Peer, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::{RoleClient, serve_client};
use serde_json::{Value, json};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::McpServerConfig;

/// Text returned when a tool call produced no text content
pub const EMPTY_RESULT: &str = "No text content available in response";

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Failed to initialize MCP server '{server}': {message}")]
    McpInitialization { server: String, message: String },
}

impl McpError {
    fn init(server: &str, message: impl std::fmt::Display) -> Self {
        McpError::McpInitialization {
            server: server.to_string(),
            message: message.to_string(),
        }
    }
}

/// Replace `${NAME}` with the value of environment variable `NAME`
pub fn expand_env(
    value: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated variable in '{}'", value))?;
        let name = &after[..end];
        let resolved = lookup(name).ok_or_else(|| format!("environment variable {} is not set", name))?;
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Join the text parts of a tool result
fn join_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let text = parts.collect::<Vec<_>>().join("\n\n");
    if text.is_empty() {
        EMPTY_RESULT.to_string()
    } else {
        text
    }
}

/// A connected MCP server
struct ConnectedServer {
    name: String,
    roles: Vec<Role>,
    tools: Vec<BoxedTool>,
    /// Set when the server has no `read_resource` tool of its own
    resource_peer: Option<Peer<RoleClient>>,
    /// Dropping this cancels the transport and kills the child process
    service: RunningService<RoleClient, ClientInfo>,
}

/// One tool of a connected server
pub struct McpTool {
    server: String,
    name: String,
    description: String,
    schema: Value,
    peer: Peer<RoleClient>,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, _tool_call_id: &str, arguments: Value, cancel: CancellationToken) -> ToolResult {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            _ => None,
        };
        tracing::debug!(server = %self.server, tool = %self.name, "Calling MCP tool");

        let call = self.peer.call_tool(CallToolRequestParam {
            name: Cow::Owned(self.name.clone()),
            arguments,
            meta: None,
            task: None,
        });
        let result = tokio::select! {
            _ = cancel.cancelled() => return ToolResult::error("Error executing MCP tool: cancelled"),
            result = call => result,
        };

        match result {
            Ok(result) => {
                let text = join_text(
                    result
                        .content
                        .iter()
                        .filter_map(|c| c.as_text().map(|t| t.text.as_str())),
                );
                if result.is_error.unwrap_or(false) {
                    ToolResult::error(format!("Error executing MCP tool: {}", text))
                } else {
                    ToolResult::text(text)
                }
            }
            Err(e) => {
                tracing::warn!(server = %self.server, tool = %self.name, error = %e, "MCP tool call failed");
                ToolResult::error(format!("Error executing MCP tool: {}", e))
            }
        }
    }
}

/// Name of the resource reader for `server`. Roles served by several
/// servers get one reader per server.
fn read_resource_name(server: &str, shared: bool) -> String {
    if shared {
        format!("{}_read_resource", server)
    } else {
        "read_resource".to_string()
    }
}

/// Reads a named resource from a server
pub struct ReadResourceTool {
    name: String,
    description: String,
    server: String,
    peer: Peer<RoleClient>,
}

#[async_trait]
impl Tool for ReadResourceTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "resourceUri": {
                    "type": "string",
                    "description": "URI of the resource to read"
                }
            },
            "required": ["resourceUri"]
        })
    }

    async fn execute(&self, _tool_call_id: &str, arguments: Value, cancel: CancellationToken) -> ToolResult {
        let Some(uri) = arguments.get("resourceUri").and_then(|v| v.as_str()) else {
            return ToolResult::error("Error executing MCP tool: missing resourceUri");
        };
        let params: ReadResourceRequestParams = match serde_json::from_value(json!({ "uri": uri })) {
            Ok(params) => params,
            Err(e) => return ToolResult::error(format!("Error executing MCP tool: {}", e)),
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => return ToolResult::error("Error executing MCP tool: cancelled"),
            result = self.peer.read_resource(params) => result,
        };

        match result {
            Ok(result) => ToolResult::text(join_text(result.contents.iter().filter_map(|c| match c {
                ResourceContents::TextResourceContents { text, .. } => Some(text.as_str()),
                _ => None,
            }))),
            Err(e) => {
                tracing::warn!(server = %self.server, uri, error = %e, "MCP resource read failed");
                ToolResult::error(format!("Error executing MCP tool: {}", e))
            }
        }
    }
}

/// The running MCP servers and the tools they expose
pub struct McpToolProvider {
    servers: Vec<ConnectedServer>,
}

impl McpToolProvider {
    /// Start every configured server. Any failure aborts startup.
    pub async fn start(configs: &BTreeMap<String, McpServerConfig>) -> Result<Self, McpError> {
        let mut servers = Vec::with_capacity(configs.len());
        for (name, config) in configs {
            if config.roles.is_empty() {
                tracing::warn!(server = %name, "MCP server has no roles, skipping");
                continue;
            }
            servers.push(Self::connect(name, config).await?);
        }
        Ok(Self { servers })
    }

    async fn connect(name: &str, config: &McpServerConfig) -> Result<ConnectedServer, McpError> {
        let lookup = |var: &str| std::env::var(var).ok();
        let args = config
            .args
            .iter()
            .map(|a| expand_env(a, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| McpError::init(name, e))?;

        let mut cmd = Command::new(&config.command);
        cmd.args(&args);
        for (key, value) in &config.env {
            cmd.env(key, expand_env(value, lookup).map_err(|e| McpError::init(name, e))?);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        // Args may carry connection strings, so only the command is logged
        tracing::info!(server = %name, command = %config.command, "Starting MCP server");
        let transport = TokioChildProcess::new(cmd).map_err(|e| McpError::init(name, e))?;

        let client_info = ClientInfo {
            meta: None,
            protocol_version: Default::default(),
            capabilities: Default::default(),
            client_info: rmcp::model::Implementation {
                name: "dash".into(),
                title: Some("dash research team".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
        };
        let service = serve_client(client_info, transport)
            .await
            .map_err(|e| McpError::init(name, e))?;
        let peer = service.peer().clone();

        let listed = peer.list_all_tools().await.map_err(|e| McpError::init(name, e))?;
        let tools: Vec<BoxedTool> = listed
            .into_iter()
            .map(|t| {
                let schema = serde_json::to_value(t.input_schema.as_ref())
                    .unwrap_or_else(|_| json!({"type": "object", "properties": {}}));
                Arc::new(McpTool {
                    server: name.to_string(),
                    name: t.name.to_string(),
                    description: t.description.as_deref().unwrap_or("").to_string(),
                    schema,
                    peer: peer.clone(),
                }) as BoxedTool
            })
            .collect();
        let resource_peer = (!tools.iter().any(|t| t.name() == "read_resource")).then_some(peer);

        tracing::info!(server = %name, tool_count = tools.len(), "Connected to MCP server");
        Ok(ConnectedServer {
            name: name.to_string(),
            roles: config.roles.clone(),
            tools,
            resource_peer,
            service,
        })
    }

    /// Tool sets per role, built once and shared by every run
    pub fn tool_sets(&self) -> HashMap<Role, ToolSet> {
        let mut by_role: HashMap<Role, Vec<BoxedTool>> = HashMap::new();
        for server in &self.servers {
            for role in &server.roles {
                let tools = by_role.entry(*role).or_default();
                tools.extend(server.tools.iter().cloned());
                if let Some(peer) = &server.resource_peer {
                    let shared = self.servers_for(*role) > 1;
                    tools.push(Arc::new(ReadResourceTool {
                        name: read_resource_name(&server.name, shared),
                        description: format!("Read a resource from the {} MCP server by URI", server.name),
                        server: server.name.clone(),
                        peer: peer.clone(),
                    }));
                }
            }
        }
        by_role
            .into_iter()
            .map(|(role, tools)| (role, ToolSet::new(tools)))
            .collect()
    }

    fn servers_for(&self, role: Role) -> usize {
        self.servers.iter().filter(|s| s.roles.contains(&role)).count()
    }

    /// Stop every server
    pub async fn shutdown(self) {
        for server in self.servers {
            tracing::info!(server = %server.name, "Stopping MCP server");
            if let Err(e) = server.service.cancel().await {
                tracing::warn!(server = %server.name, error = %e, "MCP server did not stop cleanly");
            }
        }
    }
}
