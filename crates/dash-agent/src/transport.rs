//! Transport abstraction for invoking models

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dash_ai::{
    Context, Message, Model, Result, StreamOptions, collect_message, providers::LlmProvider,
    providers::openai::OpenAIProvider,
};
use tokio_util::sync::CancellationToken;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Check if an error message describes a transient failure
fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        return true;
    }
    if lower.contains("timeout") || lower.contains("connection") {
        return true;
    }
    if ["500", "502", "503", "504"].iter().any(|code| lower.contains(code)) {
        return true;
    }
    lower.contains("overloaded")
}

/// Per-call model settings
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Model to use
    pub model: Model,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// Temperature
    pub temperature: Option<f32>,
}

impl RunConfig {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Model invocation: given a context, return one assistant reply.
///
/// The reply may request tool calls; dispatching them is the caller's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn complete(
        &self,
        context: Context,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<Message>;
}

/// Direct provider transport with retry on transient failures
pub struct ProviderTransport {
    provider: Arc<dyn LlmProvider>,
    retry_config: RetryConfig,
}

impl ProviderTransport {
    /// Create a transport over any provider
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retry_config: RetryConfig::default(),
        }
    }

    /// Create an OpenAI-compatible transport with a specific API key
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self::new(Arc::new(OpenAIProvider::new(api_key)))
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    async fn attempt(&self, context: &Context, config: &RunConfig) -> Result<Message> {
        let stream = self
            .provider
            .stream(&config.model, context, &config.stream_options())
            .await?;
        let (message, usage) = collect_message(stream).await?;
        tracing::debug!(
            model = %config.model.id,
            input_tokens = usage.input,
            output_tokens = usage.output,
            "Model call completed"
        );
        Ok(message)
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn complete(
        &self,
        context: Context,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<Message> {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(dash_ai::Error::Aborted),
                outcome = self.attempt(&context, config) => outcome,
            };

            let error = match outcome {
                Ok(message) => return Ok(message),
                Err(e) => e,
            };

            // Typed check plus string fallback for wrapped errors
            let error_msg = error.to_string();
            let retryable = error.is_retryable() || is_retryable_error(&error_msg);
            if attempt >= self.retry_config.max_retries || !retryable {
                return Err(error);
            }

            let delay = self.retry_config.delay_for_attempt(attempt);
            tracing::warn!(
                "Model request failed (attempt {}/{}): {}. Retrying in {:?}...",
                attempt + 1,
                self.retry_config.max_retries + 1,
                error_msg,
                delay
            );
            attempt += 1;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(dash_ai::Error::Aborted),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
