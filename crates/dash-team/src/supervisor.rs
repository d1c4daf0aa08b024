//! Supervisor: picks the next team member or finishes the run

use std::sync::{Arc, LazyLock};

use dash_agent::{RunConfig, Transport};
use dash_ai::{Context, Message};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::policy::RoutingPolicy;
use crate::prompts;
use crate::role::{FINISH, Role, Route};
use crate::state::{ConversationState, DEFAULT_INSTRUCTIONS, StateUpdate};

static NEXT_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\**NEXT:\**\s*(.*?)\s*(?:\**INSTRUCTIONS:|\z)").unwrap()
});
static INSTRUCTIONS_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\**INSTRUCTIONS:\**\s*(.*?)\s*\z").unwrap());
static REASONING_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\**REASONING:\**\s*(.*?)\s*(?:\**NEXT:|\**INSTRUCTIONS:|\z)").unwrap()
});

/// A validated routing decision
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// A roster member or [`Route::Finish`]
    pub next: Route,
    pub instructions: String,
    pub reasoning: Option<String>,
}

impl Decision {
    pub fn into_update(self) -> StateUpdate {
        StateUpdate {
            next: Some(self.next),
            instructions: Some(self.instructions),
            ..Default::default()
        }
    }
}

/// Why a supervisor reply could not be decoded
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// No usable `NEXT:` field
    MissingNext,
    /// `NEXT:` named something outside the roster
    UnknownActor { value: String, instructions: String },
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Strip decoration models like to put around the actor name
fn clean_actor(raw: &str) -> &str {
    raw.lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c: char| matches!(c, '*' | '[' | ']' | '`' | '"' | '\'' | '.') || c.is_whitespace())
}

/// Decode the labelled-field supervisor reply against `roster`
pub fn decode_decision(text: &str, roster: &[Role]) -> Result<Decision, DecodeError> {
    let raw_next = capture(&NEXT_FIELD, text).ok_or(DecodeError::MissingNext)?;
    let actor = clean_actor(&raw_next);
    if actor.is_empty() {
        return Err(DecodeError::MissingNext);
    }

    let instructions = capture(&INSTRUCTIONS_FIELD, text)
        .unwrap_or_else(|| prompts::PROCEED_INSTRUCTIONS.to_string());
    let reasoning = capture(&REASONING_FIELD, text);

    let next = if actor.eq_ignore_ascii_case(FINISH) {
        Route::Finish
    } else {
        match actor.parse::<Role>() {
            Ok(role) if roster.contains(&role) => Route::Member(role),
            _ => {
                return Err(DecodeError::UnknownActor {
                    value: actor.to_string(),
                    instructions,
                });
            }
        }
    };

    Ok(Decision {
        next,
        instructions,
        reasoning,
    })
}

/// Routing node of the research graph
pub struct Supervisor {
    transport: Arc<dyn Transport>,
    run: RunConfig,
    policy: RoutingPolicy,
    fallback: Role,
}

impl Supervisor {
    pub fn new(transport: Arc<dyn Transport>, run: RunConfig) -> Self {
        Self {
            transport,
            run,
            policy: RoutingPolicy::default(),
            fallback: Role::DatabaseExpert,
        }
    }

    pub fn with_policy(mut self, policy: RoutingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Member chosen whenever the model's decision is unusable
    pub fn with_fallback(mut self, fallback: Role) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback(&self) -> Role {
        self.fallback
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    fn fallback_decision(&self, instructions: Option<String>) -> Decision {
        Decision {
            next: Route::Member(self.fallback),
            instructions: instructions
                .unwrap_or_else(|| prompts::fallback_instructions(self.fallback).to_string()),
            reasoning: None,
        }
    }

    /// Keyword routing for the first step, when enabled
    fn preroute(&self, state: &ConversationState) -> Option<Decision> {
        if !self.policy.preroute || state.has_agent_output() {
            return None;
        }
        let question = state.latest_human()?;
        let (rule, keyword) = self.policy.match_rule(state.team(), question)?;
        Some(Decision {
            next: Route::Member(rule.member),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            reasoning: Some(format!("Routing rule for {} matched '{}'", rule.member, keyword)),
        })
    }

    fn context(&self, state: &ConversationState) -> Context {
        let mut context = Context::with_system(prompts::supervisor_system(state.team(), &self.policy));
        context.messages.extend(state.transcript());
        context.push(Message::system(prompts::supervisor_closing(state.team())));
        context
    }

    /// Decide the next route. Never fails: unusable model output yields the
    /// fallback decision.
    pub async fn decide(&self, state: &ConversationState, cancel: CancellationToken) -> Decision {
        if let Some(decision) = self.preroute(state) {
            tracing::debug!(next = %decision.next, "Pre-routed by keyword");
            return decision;
        }

        let reply = match self
            .transport
            .complete(self.context(state), &self.run, cancel)
            .await
        {
            Ok(reply) => reply.text(),
            Err(e) => {
                tracing::warn!(error = %e, fallback = %self.fallback, "Supervisor model call failed");
                return self.fallback_decision(None);
            }
        };

        match decode_decision(&reply, state.team()) {
            Ok(decision) => {
                tracing::debug!(
                    next = %decision.next,
                    reasoning = decision.reasoning.as_deref().unwrap_or(""),
                    "Supervisor decision"
                );
                decision
            }
            Err(DecodeError::MissingNext) => {
                tracing::warn!(fallback = %self.fallback, reply = %reply, "Supervisor reply has no NEXT field");
                self.fallback_decision(None)
            }
            Err(DecodeError::UnknownActor { value, instructions }) => {
                tracing::warn!(fallback = %self.fallback, actor = %value, "Supervisor named an actor outside the roster");
                self.fallback_decision(Some(instructions))
            }
        }
    }
}
