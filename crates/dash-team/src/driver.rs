//! Graph driver: one caller question in, one answer out

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::graph::{GraphEvent, ResearchGraph};
use crate::role::{Role, Route, strip_role_tags};
use crate::state::TeamMessage;

/// Pull the question out of a request body.
///
/// Keys are compared after trimming whitespace, so `{" question ": "..."}`
/// works. Missing, non-string or blank values yield `default`.
pub fn extract_question(body: &Value, default: &str) -> String {
    body.as_object()
        .and_then(|map| {
            map.iter()
                .find(|(key, _)| key.trim() == "question")
                .and_then(|(_, value)| value.as_str())
        })
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Result of one research run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub result: String,
    /// Whether the supervisor explicitly finished the run
    #[serde(skip)]
    pub finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_summary: Option<String>,
}

/// Latest content per role, in the order seen
#[derive(Debug, Default)]
struct AnswerTracker {
    latest: HashMap<Role, String>,
    last_expert: Option<Role>,
}

impl AnswerTracker {
    fn record(&mut self, message: &TeamMessage) {
        let Some(role) = message.role() else {
            return;
        };
        self.latest.insert(role, strip_role_tags(&message.content).to_string());
        if role.is_domain_expert() {
            self.last_expert = Some(role);
        }
    }

    /// Summarizer output first, then the most recent domain expert
    fn best(&self) -> Option<&str> {
        self.latest
            .get(&Role::DataSummarizer)
            .or_else(|| self.last_expert.and_then(|r| self.latest.get(&r)))
            .map(String::as_str)
    }
}

/// Adapts caller questions into graph runs
#[derive(Debug, Clone)]
pub struct ResearchDriver {
    graph: Arc<ResearchGraph>,
    default_question: String,
}

impl ResearchDriver {
    pub fn new(graph: Arc<ResearchGraph>, default_question: impl Into<String>) -> Self {
        Self {
            graph,
            default_question: default_question.into(),
        }
    }

    pub fn default_question(&self) -> &str {
        &self.default_question
    }

    /// Answer a raw request body
    pub async fn respond(&self, body: &Value, cancel: CancellationToken) -> Result<Answer> {
        let question = extract_question(body, &self.default_question);
        self.answer(&question, cancel).await
    }

    /// Run the graph for one question and extract the answer
    pub async fn answer(&self, question: &str, cancel: CancellationToken) -> Result<Answer> {
        let question = match question.trim() {
            "" => self.default_question.as_str(),
            q => q,
        };
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("research_run", run_id = %run_id);

        let result = self.drive(question, cancel).instrument(span.clone()).await;
        if let Err(e) = &result {
            span.in_scope(|| tracing::error!(error = %e, "Research run failed"));
        }
        result
    }

    async fn drive(&self, question: &str, cancel: CancellationToken) -> Result<Answer> {
        tracing::info!(question, "Starting research run");
        let stream = self.graph.stream(self.graph.initial_state(question), cancel);
        futures::pin_mut!(stream);

        let mut tracker = AnswerTracker::default();
        let mut final_state = None;
        let mut finished = false;

        while let Some(event) = stream.next().await {
            match event? {
                GraphEvent::Step(output) => {
                    for message in &output.update.messages {
                        tracker.record(message);
                    }
                    if output.update.next == Some(Route::Finish) {
                        finished = true;
                    }
                }
                GraphEvent::Finished(state) => {
                    finished = true;
                    final_state = Some(state);
                }
                GraphEvent::LimitReached(state) => {
                    tracing::warn!("Run ended at the recursion limit, returning partial answer");
                    final_state = Some(state);
                }
            }
        }

        let result = tracker.best().ok_or(Error::NoAnswer)?.to_string();
        let (db_result, analysis_summary) = match final_state {
            Some(state) => (
                state.db_result().cloned(),
                state.analysis_summary().map(str::to_string),
            ),
            None => (None, None),
        };
        tracing::info!(finished, "Research run complete");

        Ok(Answer {
            result,
            finished,
            db_result,
            analysis_summary,
        })
    }
}
