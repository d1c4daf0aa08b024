//! The research graph: supervisor and member nodes driven step by step

use std::collections::HashMap;
use std::fmt;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::member::Member;
use crate::role::{Role, Route};
use crate::state::{ConversationState, StateUpdate};
use crate::supervisor::Supervisor;

/// Graph settings
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Team members available in every run
    pub roster: Vec<Role>,
    /// Maximum node executions per run
    pub recursion_limit: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            roster: Role::ALL.to_vec(),
            recursion_limit: 100,
        }
    }
}

/// A graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Supervisor,
    Member(Role),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Supervisor => f.write_str("supervisor"),
            Node::Member(role) => f.write_str(role.name()),
        }
    }
}

/// What one node execution produced
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// 1-based step number
    pub step: u32,
    pub node: Node,
    pub update: StateUpdate,
}

/// Item of a run's event stream
#[derive(Debug, Clone)]
pub enum GraphEvent {
    Step(StepOutput),
    /// The supervisor chose to finish
    Finished(ConversationState),
    /// The recursion limit was hit before a finish decision
    LimitReached(ConversationState),
}

/// Final state of a drained run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: ConversationState,
    pub finished: bool,
    pub steps: u32,
}

/// Supervisor-directed state machine over a fixed roster
pub struct ResearchGraph {
    supervisor: Supervisor,
    members: HashMap<Role, Member>,
    config: GraphConfig,
}

impl fmt::Debug for ResearchGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResearchGraph")
            .field("roster", &self.config.roster)
            .field("recursion_limit", &self.config.recursion_limit)
            .finish()
    }
}

impl ResearchGraph {
    /// Build the graph, checking that every roster role has a member node
    /// and that the supervisor's fallback is routable.
    pub fn new(supervisor: Supervisor, members: Vec<Member>, mut config: GraphConfig) -> Result<Self> {
        let mut roster = Vec::with_capacity(config.roster.len());
        for role in config.roster {
            if !roster.contains(&role) {
                roster.push(role);
            }
        }
        if roster.is_empty() {
            return Err(Error::EmptyRoster);
        }
        if config.recursion_limit == 0 {
            return Err(Error::InvalidRecursionLimit);
        }

        let mut by_role = HashMap::new();
        for member in members {
            if !roster.contains(&member.role()) {
                tracing::debug!(role = %member.role(), "Member not in roster, ignoring");
                continue;
            }
            by_role.insert(member.role(), member);
        }
        if let Some(missing) = roster.iter().find(|r| !by_role.contains_key(*r)) {
            return Err(Error::MissingMember(*missing));
        }
        if !roster.contains(&supervisor.fallback()) {
            return Err(Error::InvalidDefaultRoute(supervisor.fallback()));
        }

        config.roster = roster;
        Ok(Self {
            supervisor,
            members: by_role,
            config,
        })
    }

    pub fn roster(&self) -> &[Role] {
        &self.config.roster
    }

    pub fn recursion_limit(&self) -> u32 {
        self.config.recursion_limit
    }

    /// Fresh state for one run
    pub fn initial_state(&self, question: impl Into<String>) -> ConversationState {
        ConversationState::new(question, self.config.roster.clone())
    }

    async fn step(&self, node: Node, state: &ConversationState, cancel: CancellationToken) -> Result<StateUpdate> {
        match node {
            Node::Supervisor => Ok(self.supervisor.decide(state, cancel).await.into_update()),
            Node::Member(role) => {
                let member = self.members.get(&role).ok_or(Error::MissingMember(role))?;
                member.run(state, cancel).await
            }
        }
    }

    /// Run the graph lazily, yielding each step's update followed by one
    /// terminal event. Checks `cancel` before every step.
    pub fn stream<'a>(
        &'a self,
        mut state: ConversationState,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<GraphEvent>> + Send + 'a {
        try_stream! {
            let mut steps = 0u32;
            loop {
                if cancel.is_cancelled() {
                    Err(Error::Cancelled)?;
                }

                let node = match state.next() {
                    Route::Finish => {
                        tracing::debug!(steps, "Run finished");
                        yield GraphEvent::Finished(state);
                        break;
                    }
                    Route::Supervisor => Node::Supervisor,
                    Route::Member(role) => Node::Member(role),
                };

                if steps >= self.config.recursion_limit {
                    tracing::warn!(limit = self.config.recursion_limit, "Recursion limit reached before finish");
                    yield GraphEvent::LimitReached(state);
                    break;
                }

                let update = self.step(node, &state, cancel.clone()).await?;
                steps += 1;
                tracing::debug!(step = steps, node = %node, "Step complete");
                state.apply(update.clone());
                yield GraphEvent::Step(StepOutput { step: steps, node, update });
            }
        }
    }

    /// Drain a run to completion
    pub async fn run(&self, state: ConversationState, cancel: CancellationToken) -> Result<RunOutcome> {
        let stream = self.stream(state, cancel);
        futures::pin_mut!(stream);
        let mut steps = 0;
        while let Some(event) = stream.next().await {
            match event? {
                GraphEvent::Step(output) => steps = output.step,
                GraphEvent::Finished(state) => {
                    return Ok(RunOutcome { state, finished: true, steps });
                }
                GraphEvent::LimitReached(state) => {
                    return Ok(RunOutcome { state, finished: false, steps });
                }
            }
        }
        // The stream always ends with a terminal event or an error
        Err(Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{QueryTool, ScriptedTransport, member, run_config, tool_call};
    use dash_agent::ToolSet;
    use dash_ai::Message;
    use std::sync::Arc;

    fn graph(
        supervisor: Arc<ScriptedTransport>,
        database: Arc<ScriptedTransport>,
        python: Arc<ScriptedTransport>,
        db_tools: ToolSet,
        recursion_limit: u32,
    ) -> ResearchGraph {
        ResearchGraph::new(
            Supervisor::new(supervisor, run_config()),
            vec![
                member(Role::DatabaseExpert, database, db_tools),
                member(Role::PythonExpert, python, ToolSet::empty()),
            ],
            GraphConfig {
                roster: vec![Role::DatabaseExpert, Role::PythonExpert],
                recursion_limit,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_missing_member_fails_construction() {
        let t = ScriptedTransport::texts(&[], "");
        let err = ResearchGraph::new(
            Supervisor::new(t.clone(), run_config()),
            vec![member(Role::DatabaseExpert, t, ToolSet::empty())],
            GraphConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingMember(Role::PythonExpert)));
    }

    #[test]
    fn test_fallback_must_be_in_roster() {
        let t = ScriptedTransport::texts(&[], "");
        let err = ResearchGraph::new(
            Supervisor::new(t.clone(), run_config()),
            vec![member(Role::PythonExpert, t, ToolSet::empty())],
            GraphConfig {
                roster: vec![Role::PythonExpert],
                recursion_limit: 10,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidDefaultRoute(Role::DatabaseExpert)));
    }

    #[test]
    fn test_empty_roster_and_zero_limit() {
        let t = ScriptedTransport::texts(&[], "");
        let empty = GraphConfig {
            roster: vec![],
            recursion_limit: 10,
        };
        assert!(matches!(
            ResearchGraph::new(Supervisor::new(t.clone(), run_config()), vec![], empty),
            Err(Error::EmptyRoster)
        ));

        let zero = GraphConfig {
            roster: vec![Role::DatabaseExpert],
            recursion_limit: 0,
        };
        let members = vec![member(Role::DatabaseExpert, t.clone(), ToolSet::empty())];
        assert!(matches!(
            ResearchGraph::new(Supervisor::new(t, run_config()), members, zero),
            Err(Error::InvalidRecursionLimit)
        ));
    }

    #[test]
    fn test_duplicate_roster_entries_collapse() {
        let t = ScriptedTransport::texts(&[], "");
        let graph = ResearchGraph::new(
            Supervisor::new(t.clone(), run_config()),
            vec![member(Role::DatabaseExpert, t, ToolSet::empty())],
            GraphConfig {
                roster: vec![Role::DatabaseExpert, Role::DatabaseExpert],
                recursion_limit: 5,
            },
        )
        .unwrap();
        assert_eq!(graph.roster(), &[Role::DatabaseExpert]);
    }

    #[tokio::test]
    async fn test_supervisor_member_alternation() {
        let g = graph(
            ScriptedTransport::texts(
                &[
                    "NEXT: DatabaseExpert\nINSTRUCTIONS: count",
                    "NEXT: PythonExpert\nINSTRUCTIONS: average",
                    "NEXT: FINISH\nINSTRUCTIONS: done",
                ],
                "",
            ),
            ScriptedTransport::texts(&["12 rows"], ""),
            ScriptedTransport::texts(&["mean 4.2"], ""),
            ToolSet::empty(),
            20,
        );

        let state = g.initial_state("q");
        let stream = g.stream(state, CancellationToken::new());
        futures::pin_mut!(stream);

        let mut nodes = vec![];
        let mut finished = None;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                GraphEvent::Step(out) => nodes.push(out.node),
                GraphEvent::Finished(state) => finished = Some(state),
                GraphEvent::LimitReached(_) => panic!("limit should not be reached"),
            }
        }
        assert_eq!(
            nodes,
            vec![
                Node::Supervisor,
                Node::Member(Role::DatabaseExpert),
                Node::Supervisor,
                Node::Member(Role::PythonExpert),
                Node::Supervisor,
            ]
        );

        let state = finished.unwrap();
        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.messages()[1].content, "[DatabaseExpert] 12 rows");
        assert_eq!(state.messages()[2].content, "[PythonExpert] mean 4.2");
        assert_eq!(state.db_result(), Some(&serde_json::Value::String("12 rows".into())));
        assert_eq!(state.analysis_summary(), Some("mean 4.2"));
    }

    #[tokio::test]
    async fn test_transcript_only_grows() {
        let g = graph(
            ScriptedTransport::texts(&[], "NEXT: DatabaseExpert\nINSTRUCTIONS: again"),
            ScriptedTransport::texts(&[], "still counting"),
            ScriptedTransport::texts(&[], ""),
            ToolSet::empty(),
            9,
        );

        let stream = g.stream(g.initial_state("q"), CancellationToken::new());
        futures::pin_mut!(stream);
        let mut replay = g.initial_state("q");
        while let Some(event) = stream.next().await {
            if let GraphEvent::Step(out) = event.unwrap() {
                let before = replay.messages().to_vec();
                replay.apply(out.update);
                assert!(replay.messages().len() >= before.len());
                assert_eq!(&replay.messages()[..before.len()], before.as_slice());
                assert!(replay.accepts(replay.next()));
            }
        }
    }

    #[tokio::test]
    async fn test_limit_reached_without_finish() {
        let g = graph(
            ScriptedTransport::texts(&[], "NEXT: DatabaseExpert\nINSTRUCTIONS: again"),
            ScriptedTransport::texts(&[], "still counting"),
            ScriptedTransport::texts(&[], ""),
            ToolSet::empty(),
            5,
        );

        let outcome = g.run(g.initial_state("q"), CancellationToken::new()).await.unwrap();
        assert!(!outcome.finished);
        assert_eq!(outcome.steps, 5);
        // supervisor, db, supervisor, db, supervisor
        assert_eq!(outcome.state.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_tool_failure_does_not_end_run() {
        let db_transport = ScriptedTransport::new(
            vec![
                Ok(tool_call("read_query", serde_json::json!({"query": "SELEC *"}))),
                Ok(Message::assistant("The query failed with a syntax error.")),
                Ok(tool_call("read_query", serde_json::json!({"query": "SELECT 1"}))),
                Ok(Message::assistant("Fixed: 12 employees.")),
            ],
            "",
        );
        let g = graph(
            ScriptedTransport::texts(
                &[
                    "NEXT: DatabaseExpert\nINSTRUCTIONS: count",
                    "NEXT: DatabaseExpert\nINSTRUCTIONS: fix the SQL and retry",
                    "NEXT: FINISH",
                ],
                "",
            ),
            db_transport,
            ScriptedTransport::texts(&[], ""),
            ToolSet::new(vec![QueryTool::failing("syntax error")]),
            20,
        );

        let outcome = g.run(g.initial_state("q"), CancellationToken::new()).await.unwrap();
        assert!(outcome.finished);
        let contents: Vec<_> = outcome.state.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents[1..],
            [
                "[DatabaseExpert] The query failed with a syntax error.",
                "[DatabaseExpert] Fixed: 12 employees.",
            ]
        );
        assert_eq!(outcome.state.instructions(), "Please proceed with your expertise.");
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let g = graph(
            ScriptedTransport::texts(&[], "NEXT: DatabaseExpert"),
            ScriptedTransport::texts(&[], "x"),
            ScriptedTransport::texts(&[], ""),
            ToolSet::empty(),
            5,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = g.run(g.initial_state("q"), cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
