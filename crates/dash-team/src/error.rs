//! Error types for dash-team

use thiserror::Error;

use crate::role::Role;

/// Result type alias using dash-team Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that escape the orchestration core.
///
/// Model and tool failures never show up here; members and the supervisor
/// absorb them into the transcript or a fallback decision.
#[derive(Error, Debug)]
pub enum Error {
    /// A roster role has no registered member node
    #[error("No member registered for role {0}")]
    MissingMember(Role),

    #[error("Team roster is empty")]
    EmptyRoster,

    /// The supervisor's fallback role is not part of the roster
    #[error("Fallback member {0} is not in the team roster")]
    InvalidDefaultRoute(Role),

    #[error("Recursion limit must be at least 1")]
    InvalidRecursionLimit,

    #[error("Run cancelled")]
    Cancelled,

    /// The run ended without any member output to answer with
    #[error("Run produced no answer")]
    NoAnswer,
}
