//! Conversation state shared by every step of one run

use serde::Serialize;
use serde_json::Value;

use crate::role::{Role, Route};

/// Instructions used before the supervisor has spoken
pub const DEFAULT_INSTRUCTIONS: &str = "Solve the human's question.";

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Origin {
    Human,
    System,
    Agent(Role),
}

/// One immutable transcript entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMessage {
    pub origin: Origin,
    pub content: String,
}

impl TeamMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            origin: Origin::Human,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            origin: Origin::System,
            content: content.into(),
        }
    }

    /// An agent reply, tagged with the role name for attribution
    pub fn agent(role: Role, reply: &str) -> Self {
        Self {
            origin: Origin::Agent(role),
            content: role.tagged(reply),
        }
    }

    /// The producing role, for agent output
    pub fn role(&self) -> Option<Role> {
        match self.origin {
            Origin::Agent(role) => Some(role),
            _ => None,
        }
    }

    /// Convert to a model message
    pub fn to_model_message(&self) -> dash_ai::Message {
        match self.origin {
            Origin::Human => dash_ai::Message::user(self.content.clone()),
            Origin::System => dash_ai::Message::system(self.content.clone()),
            Origin::Agent(role) => dash_ai::Message::named_user(role.name(), self.content.clone()),
        }
    }
}

/// The result of one step, merged into the state by [`ConversationState::apply`].
///
/// Messages are appended; every other present field overwrites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<TeamMessage>,
    pub next: Option<Route>,
    pub instructions: Option<String>,
    pub db_result: Option<Value>,
    pub analysis_summary: Option<String>,
}

/// State threaded through one run. Created per run, never shared.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<TeamMessage>,
    team: Vec<Role>,
    next: Route,
    instructions: String,
    db_result: Option<Value>,
    analysis_summary: Option<String>,
}

impl ConversationState {
    /// Initial state: one human message and default routing fields
    pub fn new(question: impl Into<String>, team: Vec<Role>) -> Self {
        Self {
            messages: vec![TeamMessage::human(question)],
            team,
            next: Route::Supervisor,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            db_result: None,
            analysis_summary: None,
        }
    }

    pub fn messages(&self) -> &[TeamMessage] {
        &self.messages
    }

    pub fn team(&self) -> &[Role] {
        &self.team
    }

    pub fn next(&self) -> Route {
        self.next
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn db_result(&self) -> Option<&Value> {
        self.db_result.as_ref()
    }

    pub fn analysis_summary(&self) -> Option<&str> {
        self.analysis_summary.as_deref()
    }

    /// Whether any team member has contributed yet
    pub fn has_agent_output(&self) -> bool {
        self.messages.iter().any(|m| m.role().is_some())
    }

    /// The most recent human message
    pub fn latest_human(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.origin == Origin::Human)
            .map(|m| m.content.as_str())
    }

    /// Whether `route` is a legal value for `next` in this run
    pub fn accepts(&self, route: Route) -> bool {
        match route {
            Route::Member(role) => self.team.contains(&role),
            Route::Supervisor | Route::Finish => true,
        }
    }

    /// Merge a step's update into the state
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        if let Some(next) = update.next {
            debug_assert!(self.accepts(next), "route {} outside roster", next);
            self.next = next;
        }
        if let Some(instructions) = update.instructions {
            self.instructions = instructions;
        }
        if let Some(db_result) = update.db_result {
            self.db_result = Some(db_result);
        }
        if let Some(summary) = update.analysis_summary {
            self.analysis_summary = Some(summary);
        }
    }

    /// Transcript as model messages
    pub fn transcript(&self) -> Vec<dash_ai::Message> {
        self.messages.iter().map(TeamMessage::to_model_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ConversationState {
        ConversationState::new("How many employees?", vec![Role::DatabaseExpert, Role::PythonExpert])
    }

    #[test]
    fn test_initial_state() {
        let s = state();
        assert_eq!(s.messages().len(), 1);
        assert_eq!(s.next(), Route::Supervisor);
        assert_eq!(s.instructions(), DEFAULT_INSTRUCTIONS);
        assert!(!s.has_agent_output());
        assert_eq!(s.latest_human(), Some("How many employees?"));
    }

    #[test]
    fn test_apply_appends_messages() {
        let mut s = state();
        let before = s.messages().to_vec();
        s.apply(StateUpdate {
            messages: vec![TeamMessage::agent(Role::DatabaseExpert, "12")],
            next: Some(Route::Supervisor),
            ..Default::default()
        });
        assert_eq!(s.messages().len(), 2);
        assert_eq!(&s.messages()[..1], before.as_slice());
        assert_eq!(s.messages()[1].content, "[DatabaseExpert] 12");
        assert!(s.has_agent_output());
    }

    #[test]
    fn test_apply_overwrites_scalars() {
        let mut s = state();
        s.apply(StateUpdate {
            next: Some(Route::Member(Role::PythonExpert)),
            instructions: Some("plot it".into()),
            db_result: Some(serde_json::json!({"row_count": 1})),
            ..Default::default()
        });
        s.apply(StateUpdate {
            db_result: Some(serde_json::json!({"row_count": 2})),
            analysis_summary: Some("mean 4.2".into()),
            ..Default::default()
        });
        assert_eq!(s.next(), Route::Member(Role::PythonExpert));
        assert_eq!(s.instructions(), "plot it");
        assert_eq!(s.db_result().unwrap()["row_count"], 2);
        assert_eq!(s.analysis_summary(), Some("mean 4.2"));
    }

    #[test]
    fn test_empty_update_keeps_fields() {
        let mut s = state();
        s.apply(StateUpdate {
            db_result: Some(serde_json::json!([1])),
            ..Default::default()
        });
        s.apply(StateUpdate::default());
        assert_eq!(s.db_result(), Some(&serde_json::json!([1])));
        assert_eq!(s.next(), Route::Supervisor);
    }

    #[test]
    fn test_accepts_only_roster_members() {
        let s = state();
        assert!(s.accepts(Route::Finish));
        assert!(s.accepts(Route::Member(Role::DatabaseExpert)));
        assert!(!s.accepts(Route::Member(Role::DataSummarizer)));
    }

    #[test]
    fn test_transcript_conversion() {
        let mut s = state();
        s.apply(StateUpdate {
            messages: vec![TeamMessage::agent(Role::PythonExpert, "done")],
            ..Default::default()
        });
        let transcript = s.transcript();
        assert_eq!(transcript[0].role(), "user");
        match &transcript[1] {
            dash_ai::Message::User { name, .. } => assert_eq!(name.as_deref(), Some("PythonExpert")),
            other => panic!("expected named user message, got {:?}", other),
        }
    }
}
