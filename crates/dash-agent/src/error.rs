//! Error types for dash-agent

use thiserror::Error;

/// Result type alias using dash-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during an agent turn
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model invocation layer
    #[error(transparent)]
    Ai(#[from] dash_ai::Error),

    /// The model kept requesting tools past the configured bound
    #[error("Tool round limit of {0} reached without a final reply")]
    ToolRoundsExceeded(u32),

    /// The turn was cancelled
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Check if retrying the whole request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_retryable(),
            _ => false,
        }
    }
}
