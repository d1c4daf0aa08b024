//! dash-ai: chat-completions model invocation layer
//!
//! This crate provides the message, tool and model types shared by the agent
//! runtime and the orchestration core, plus an OpenAI-compatible streaming
//! provider (OpenRouter, OpenAI, or any compatible endpoint).

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{MessageEvent, MessageEventStream, collect_message};
pub use types::*;
