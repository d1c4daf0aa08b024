//! dash-team: supervisor-directed research team orchestration
//!
//! A [`ResearchGraph`] alternates between a [`Supervisor`], which picks the
//! next team member from the transcript, and [`Member`] nodes, which run one
//! agent turn each and append a tagged reply. The [`ResearchDriver`] turns a
//! caller question into one run and extracts the answer.

pub mod driver;
pub mod error;
pub mod graph;
pub mod member;
pub mod policy;
pub mod prompts;
pub mod role;
pub mod state;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::{Answer, ResearchDriver, extract_question};
pub use error::{Error, Result};
pub use graph::{GraphConfig, GraphEvent, Node, ResearchGraph, RunOutcome, StepOutput};
pub use member::Member;
pub use policy::{RoutingPolicy, RoutingRule};
pub use role::{Role, Route, strip_role_tags};
pub use state::{ConversationState, Origin, StateUpdate, TeamMessage};
pub use supervisor::{Decision, DecodeError, Supervisor, decode_decision};
