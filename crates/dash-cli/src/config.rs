//! Configuration file support

use anyhow::Context as _;
use dash_team::{Role, RoutingPolicy, RoutingRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for dash
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub models: ModelsConfig,
    pub graph: GraphSettings,
    pub routing: RoutingConfig,
    pub mcp_servers: McpServers,
    pub server: ServerConfig,
}

/// OpenAI-compatible endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// API key (alternative to the environment variable)
    pub api_key: Option<String>,
    /// Sent as `HTTP-Referer`
    pub referer: Option<String>,
    /// Sent as `X-Title`
    pub title: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".into(),
            api_key_env: "OPENROUTER_API_KEY".into(),
            api_key: None,
            referer: None,
            title: Some("MCP Integration App".into()),
        }
    }
}

/// One model binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub id: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    fn new(id: &str, temperature: f32) -> Self {
        Self {
            id: id.into(),
            temperature: Some(temperature),
            max_tokens: None,
        }
    }
}

/// Models per node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub supervisor: ModelSettings,
    pub database: ModelSettings,
    pub python: ModelSettings,
    pub summarizer: ModelSettings,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            supervisor: ModelSettings::new("qwen/qwen-2.5-72b-instruct", 0.3),
            database: ModelSettings::new("deepseek/deepseek-chat", 0.2),
            python: ModelSettings::new("deepseek/deepseek-chat", 0.2),
            summarizer: ModelSettings::new("deepseek/deepseek-chat", 0.2),
        }
    }
}

impl ModelsConfig {
    pub fn for_role(&self, role: Role) -> &ModelSettings {
        match role {
            Role::DatabaseExpert => &self.database,
            Role::PythonExpert => &self.python,
            Role::DataSummarizer => &self.summarizer,
        }
    }
}

/// Run shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub recursion_limit: u32,
    pub max_tool_rounds: u32,
    pub default_question: String,
    pub fallback_member: Role,
    pub team: Vec<Role>,
    /// Route the first step by keyword without a model call
    pub preroute: bool,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            recursion_limit: 100,
            max_tool_rounds: 8,
            default_question: "How many employees are with the company for more than 4 years".into(),
            fallback_member: Role::DatabaseExpert,
            team: Role::ALL.to_vec(),
            preroute: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub rules: Vec<RoutingRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            rules: RoutingPolicy::default().rules,
        }
    }
}

/// An MCP server launched as a stdio child process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Roles that receive this server's tools
    #[serde(default)]
    pub roles: Vec<Role>,
}

/// Configured MCP servers by name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct McpServers(pub BTreeMap<String, McpServerConfig>);

impl Default for McpServers {
    fn default() -> Self {
        let mut servers = BTreeMap::new();
        servers.insert(
            "postgres".to_string(),
            McpServerConfig {
                command: "docker".into(),
                args: ["run", "-i", "--rm", "mcp/postgres", "${DATABASE_URL}"]
                    .map(String::from)
                    .to_vec(),
                env: BTreeMap::new(),
                roles: vec![Role::DatabaseExpert],
            },
        );
        servers.insert(
            "python".to_string(),
            McpServerConfig {
                command: "docker".into(),
                args: ["run", "-i", "--rm", "bhagatsurya/python-repl-node:latest"]
                    .map(String::from)
                    .to_vec(),
                env: BTreeMap::new(),
                roles: vec![Role::PythonExpert],
            },
        );
        Self(servers)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".into(),
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dash")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("DASH_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from `path`, or defaults if the file does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write the example config to `path` unless a file is already there
    pub fn init(path: &Path) -> std::io::Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, example_config())?;
        Ok(true)
    }

    /// API key from config, then from the configured environment variable
    pub fn api_key(&self) -> anyhow::Result<String> {
        dash_ai::providers::get_api_key(self.provider.api_key.as_deref(), &self.provider.api_key_env)
            .with_context(|| {
                format!(
                    "No API key: set {} or provider.api_key in the config file",
                    self.provider.api_key_env
                )
            })
    }

    /// Routing policy combining the rule list and the pre-route switch
    pub fn routing_policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            rules: self.routing.rules.clone(),
            preroute: self.graph.preroute,
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# dash configuration file
# Place at ~/.config/dash/config.toml (Linux) or set DASH_CONFIG_PATH

[provider]
base_url = "https://openrouter.ai/api/v1"
# The API key is read from this environment variable
api_key_env = "OPENROUTER_API_KEY"
# api_key = "..."   # prefer the environment variable
# referer = "https://example.com/"
title = "MCP Integration App"

[models.supervisor]
id = "qwen/qwen-2.5-72b-instruct"
temperature = 0.3

[models.database]
id = "deepseek/deepseek-chat"
temperature = 0.2

[models.python]
id = "deepseek/deepseek-chat"
temperature = 0.2

[models.summarizer]
id = "deepseek/deepseek-chat"
temperature = 0.2

[graph]
recursion_limit = 100
max_tool_rounds = 8
default_question = "How many employees are with the company for more than 4 years"
fallback_member = "DatabaseExpert"
team = ["DatabaseExpert", "PythonExpert", "DataSummarizer"]
# Route the first step by keyword, skipping the supervisor model
preroute = false

# Routing rules, highest priority first
[[routing.rules]]
member = "DatabaseExpert"
description = "MUST BE SELECTED for ALL database operations, including read-only PostgreSQL queries (read_query) and schema lookups."
keywords = ["sql", "database", "table", "query", "how many", "count"]

[[routing.rules]]
member = "PythonExpert"
description = "MUST BE SELECTED for ALL code execution, including running Python code and processing data (execute_code) and accessing resources (read_resource)."
keywords = ["python", "code", "plot", "chart", "calculate", "analyze"]

[[routing.rules]]
member = "DataSummarizer"
description = "Select once the data has been gathered, to turn the results into a concise answer for the user."

# MCP servers are started as stdio child processes.
# ${VAR} in args and env is replaced from dash's environment at startup.
[mcp_servers.postgres]
command = "docker"
args = ["run", "-i", "--rm", "mcp/postgres", "${DATABASE_URL}"]
roles = ["DatabaseExpert"]

[mcp_servers.python]
command = "docker"
args = ["run", "-i", "--rm", "bhagatsurya/python-repl-node:latest"]
roles = ["PythonExpert"]

[server]
bind = "127.0.0.1:3000"
"#
}
