//! Member node: one agent turn for one role

use std::sync::LazyLock;

use dash_agent::Agent;
use dash_ai::Message;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::prompts;
use crate::role::{Role, Route, strip_role_tags};
use crate::state::{ConversationState, Origin, StateUpdate, TeamMessage};

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());

/// Parse a database reply into a JSON payload, falling back to the raw text
pub fn parse_db_payload(reply: &str) -> Value {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return value;
    }
    FENCED_JSON
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .and_then(|block| serde_json::from_str(block.as_str()).ok())
        .unwrap_or_else(|| Value::String(reply.to_string()))
}

fn side_payload(role: Role, reply: &str) -> StateUpdate {
    match role {
        Role::DatabaseExpert => StateUpdate {
            db_result: Some(parse_db_payload(reply)),
            ..Default::default()
        },
        Role::PythonExpert => StateUpdate {
            analysis_summary: Some(reply.to_string()),
            ..Default::default()
        },
        Role::DataSummarizer => StateUpdate::default(),
    }
}

/// A team member bound to its agent
pub struct Member {
    role: Role,
    agent: Agent,
}

impl Member {
    pub fn new(role: Role, agent: Agent) -> Self {
        Self { role, agent }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Messages sent to the agent: framing around the shared transcript
    fn framed(&self, state: &ConversationState) -> Vec<Message> {
        let tools = self.agent.tools();
        let mut messages = Vec::with_capacity(state.messages().len() + 4);
        messages.push(Message::system(prompts::member_start(self.role, prompts::member_prompt(self.role), tools)));
        messages.push(Message::system(prompts::role_reinforcement(self.role, tools)));
        messages.extend(state.transcript());
        messages.push(Message::system(prompts::member_instructions(state.instructions())));
        messages.push(Message::system(prompts::member_end(self.role, tools)));
        messages
    }

    /// Run one turn and return the update to merge.
    ///
    /// Model and tool failures become an in-band reply; only cancellation
    /// is returned as an error.
    pub async fn run(&self, state: &ConversationState, cancel: CancellationToken) -> Result<StateUpdate> {
        let role = self.role;
        match self.agent.run_turn(self.framed(state), cancel.clone()).await {
            Ok(outcome) => {
                tracing::info!(
                    role = %role,
                    tool_calls = outcome.tool_calls,
                    tool_errors = outcome.tool_errors,
                    "Member turn complete"
                );
                // Replies that echo transcript tags are re-tagged once
                let reply = strip_role_tags(&outcome.reply);
                let mut update = side_payload(role, reply);
                update.messages = vec![TeamMessage::agent(role, reply)];
                update.next = Some(Route::Supervisor);
                Ok(update)
            }
            Err(_) if cancel.is_cancelled() => Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "Member turn failed");
                Ok(StateUpdate {
                    messages: vec![TeamMessage {
                        origin: Origin::Agent(role),
                        content: prompts::member_failure(role),
                    }],
                    next: Some(Route::Supervisor),
                    ..Default::default()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{QueryTool, ScriptedTransport, member, tool_call};
    use dash_agent::ToolSet;

    fn state() -> ConversationState {
        ConversationState::new(
            "How many employees have been with the company over 4 years?",
            vec![Role::DatabaseExpert, Role::PythonExpert],
        )
    }

    #[test]
    fn test_parse_db_payload() {
        let v = parse_db_payload(r#"{"sql": "SELECT 1", "row_count": 1, "rows": [{"n": 12}]}"#);
        assert_eq!(v["row_count"], 1);

        let fenced = "Here you go:\n```json\n{\"row_count\": 3}\n```\nDone.";
        assert_eq!(parse_db_payload(fenced)["row_count"], 3);

        let raw = "There are 12 employees.";
        assert_eq!(parse_db_payload(raw), Value::String(raw.into()));
    }

    #[tokio::test]
    async fn test_framing_order() {
        let transport = ScriptedTransport::texts(&["ok"], "");
        let tools = ToolSet::new(vec![QueryTool::ok("[]")]);
        let node = member(Role::DatabaseExpert, transport.clone(), tools);

        node.run(&state(), CancellationToken::new()).await.unwrap();

        let seen = transport.seen.lock();
        let messages = &seen[0].messages;
        assert_eq!(messages.len(), 5);
        assert!(messages[0].text().contains("YOU ARE THE DatabaseExpert"));
        assert!(messages[0].text().contains("- read_query: Run a read-only SQL query"));
        assert!(messages[1].text().contains("DATABASE OPERATIONS ONLY"));
        assert_eq!(messages[2].role(), "user");
        assert!(messages[3].text().contains("Solve the human's question."));
        assert!(messages[4].text().starts_with("CRITICAL REMINDERS"));
        assert_eq!(seen[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_database_reply_tagged_with_payload() {
        let reply = r#"{"sql": "SELECT count(*) FROM employees", "row_count": 1, "rows": [{"count": 12}]}"#;
        let transport = ScriptedTransport::new(
            vec![
                Ok(tool_call("read_query", serde_json::json!({"query": "SELECT count(*) FROM employees"}))),
                Ok(Message::assistant(reply)),
            ],
            "",
        );
        let tool = QueryTool::ok(r#"[{"count": 12}]"#);
        let node = member(Role::DatabaseExpert, transport, ToolSet::new(vec![tool.clone()]));

        let update = node.run(&state(), CancellationToken::new()).await.unwrap();

        assert_eq!(tool.call_count(), 1);
        assert_eq!(update.next, Some(Route::Supervisor));
        assert_eq!(update.messages.len(), 1);
        assert_eq!(update.messages[0].origin, Origin::Agent(Role::DatabaseExpert));
        assert!(update.messages[0].content.starts_with("[DatabaseExpert] {"));
        assert_eq!(update.db_result.unwrap()["rows"][0]["count"], 12);
        assert!(update.analysis_summary.is_none());
    }

    #[tokio::test]
    async fn test_echoed_tag_is_not_doubled() {
        let transport = ScriptedTransport::texts(&["[DatabaseExpert] There are 12 employees."], "");
        let node = member(Role::DatabaseExpert, transport, ToolSet::empty());

        let update = node.run(&state(), CancellationToken::new()).await.unwrap();
        assert_eq!(update.messages[0].content, "[DatabaseExpert] There are 12 employees.");
        assert_eq!(update.db_result, Some(Value::String("There are 12 employees.".into())));
    }

    #[tokio::test]
    async fn test_python_reply_sets_summary() {
        let transport = ScriptedTransport::texts(&["Mean tenure is 4.2 years."], "");
        let node = member(Role::PythonExpert, transport, ToolSet::empty());

        let update = node.run(&state(), CancellationToken::new()).await.unwrap();
        assert_eq!(update.analysis_summary.as_deref(), Some("Mean tenure is 4.2 years."));
        assert!(update.db_result.is_none());
    }

    #[tokio::test]
    async fn test_tool_failure_still_appends_reply() {
        let transport = ScriptedTransport::new(
            vec![
                Ok(tool_call("read_query", serde_json::json!({"query": "SELEC 1"}))),
                Ok(Message::assistant("I had trouble running the query: syntax error.")),
            ],
            "",
        );
        let tool = QueryTool::failing("syntax error at or near \"SELEC\"");
        let node = member(Role::DatabaseExpert, transport.clone(), ToolSet::new(vec![tool]));

        let update = node.run(&state(), CancellationToken::new()).await.unwrap();
        assert_eq!(
            update.messages[0].content,
            "[DatabaseExpert] I had trouble running the query: syntax error."
        );

        // The error text reached the model inside the same turn
        let seen = transport.seen.lock();
        let fed_back = seen[1].messages.last().unwrap();
        assert!(fed_back.text().starts_with("Error executing MCP tool:"));
    }

    #[tokio::test]
    async fn test_model_failure_becomes_issue_message() {
        let transport = ScriptedTransport::new(vec![Err(dash_ai::Error::InvalidApiKey)], "");
        let node = member(Role::PythonExpert, transport, ToolSet::empty());

        let update = node.run(&state(), CancellationToken::new()).await.unwrap();
        assert_eq!(update.next, Some(Route::Supervisor));
        assert_eq!(update.messages[0].origin, Origin::Agent(Role::PythonExpert));
        assert!(update.messages[0].content.contains("encountered an issue"));
        assert!(update.analysis_summary.is_none());
    }

    #[tokio::test]
    async fn test_tool_round_exhaustion_becomes_issue_message() {
        let calls: Vec<_> = (0..10)
            .map(|_| Ok(tool_call("read_query", serde_json::json!({"query": "SELECT 1"}))))
            .collect();
        let transport = ScriptedTransport::new(calls, "");
        let node = member(
            Role::DatabaseExpert,
            transport,
            ToolSet::new(vec![QueryTool::ok("[]")]),
        );

        let update = node.run(&state(), CancellationToken::new()).await.unwrap();
        assert!(update.messages[0].content.contains("encountered an issue"));
        assert!(update.db_result.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_is_an_error() {
        let transport = ScriptedTransport::texts(&["ok"], "");
        let node = member(Role::DataSummarizer, transport, ToolSet::empty());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = node.run(&state(), cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
