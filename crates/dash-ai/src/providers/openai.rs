//! OpenAI-compatible Chat Completions provider (OpenRouter, OpenAI, custom endpoints)

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    providers::LlmProvider,
    stream::{MessageEvent, MessageEventStream},
    types::{AssistantMetadata, Content, Context, Message, Model, StopReason, StreamOptions, Usage},
};

/// Chat Completions API client
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAIProvider {
    /// Create a new provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Create from an environment variable
    pub fn from_env(env_var: &str) -> Result<Self> {
        let api_key = std::env::var(env_var).map_err(|_| Error::InvalidApiKey)?;
        Ok(Self::new(api_key))
    }

    fn headers(&self, model: &Model) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::InvalidApiKey)?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        // Model-specific headers (e.g. OpenRouter's HTTP-Referer / X-Title)
        for (key, value) in &model.headers {
            match (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                (Ok(name), Ok(val)) => {
                    headers.insert(name, val);
                }
                _ => tracing::warn!(header = %key, "Skipping invalid model header"),
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        if model.base_url.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "model '{}' has no base_url",
                model.id
            )));
        }

        let request = build_request(model, context, options);
        let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));
        let request_builder = self
            .client
            .post(&url)
            .headers(self.headers(model)?)
            .json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

fn build_request(model: &Model, context: &Context, options: &StreamOptions) -> ChatRequest {
    let messages = context.messages.iter().flat_map(convert_message).collect();

    let tools = if context.tools.is_empty() {
        None
    } else {
        Some(
            context
                .tools
                .iter()
                .map(|t| ChatTool {
                    tool_type: "function".to_string(),
                    function: ChatFunction {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                    },
                })
                .collect(),
        )
    };

    let has_tools = tools.is_some();
    ChatRequest {
        model: model.id.clone(),
        messages,
        stream: true,
        max_tokens: Some(options.max_tokens.unwrap_or(model.max_tokens)),
        temperature: options.temperature,
        tools,
        tool_choice: has_tools.then(|| serde_json::json!("auto")),
    }
}

fn text_of(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| c.as_text())
        .collect::<Vec<_>>()
        .join("")
}

fn convert_message(msg: &Message) -> Vec<ChatMessage> {
    match msg {
        Message::System { content } => vec![ChatMessage {
            role: "system".to_string(),
            content: Some(content.clone()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }],
        Message::User { content, name, .. } => vec![ChatMessage {
            role: "user".to_string(),
            content: Some(text_of(content)),
            name: name.clone(),
            tool_calls: None,
            tool_call_id: None,
        }],
        Message::Assistant { content, .. } => {
            let tool_calls: Vec<ChatToolCall> = content
                .iter()
                .filter_map(|c| match c {
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some(ChatToolCall {
                        id: id.clone(),
                        call_type: "function".to_string(),
                        function: ChatFunctionCall {
                            name: name.clone(),
                            arguments: arguments.to_string(),
                        },
                    }),
                    _ => None,
                })
                .collect();

            let text = text_of(content);
            vec![ChatMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then_some(text),
                name: None,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }]
        }
        Message::ToolResult {
            tool_call_id,
            content,
            ..
        } => vec![ChatMessage {
            role: "tool".to_string(),
            content: Some(text_of(content)),
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        }],
    }
}

fn describe_sse_error(error: reqwest_eventsource::Error) -> String {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, _) => {
            format!("HTTP status {}", status)
        }
        other => format!("SSE error: {}", other),
    }
}

fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut tool_calls: Vec<(String, String, String)> = Vec::new(); // (id, name, args)
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        yield MessageEvent::Start {
            message: Message::Assistant {
                content: vec![],
                metadata: AssistantMetadata {
                    model: Some(model.id.clone()),
                    ..Default::default()
                },
            },
        };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    let chunk = match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            event_source.close();
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    };

                    if let Some(err) = chunk.error {
                        event_source.close();
                        yield MessageEvent::Error {
                            message: format!("API error: {}", err.message),
                        };
                        return;
                    }

                    for choice in &chunk.choices {
                        if let Some(ref content) = choice.delta.content {
                            accumulated_text.push_str(content);
                            yield MessageEvent::TextDelta {
                                content_index: 0,
                                delta: content.clone(),
                            };
                        }

                        if let Some(ref tcs) = choice.delta.tool_calls {
                            for tc in tcs {
                                let Some(idx) = tool_call_slot(&mut tool_calls, tc.index) else {
                                    event_source.close();
                                    yield MessageEvent::Error {
                                        message: format!("Invalid tool call index: {}", tc.index),
                                    };
                                    return;
                                };

                                if let Some(ref id) = tc.id {
                                    tool_calls[idx].0 = id.clone();
                                }
                                if let Some(ref function) = tc.function {
                                    if let Some(ref name) = function.name {
                                        tool_calls[idx].1 = name.clone();
                                        yield MessageEvent::ToolCallStart {
                                            content_index: idx,
                                            id: tool_calls[idx].0.clone(),
                                            name: name.clone(),
                                        };
                                    }
                                    if let Some(ref args) = function.arguments {
                                        tool_calls[idx].2.push_str(args);
                                        yield MessageEvent::ToolCallDelta {
                                            content_index: idx,
                                            delta: args.clone(),
                                        };
                                    }
                                }
                            }
                        }

                        if let Some(ref reason) = choice.finish_reason {
                            finish_reason = Some(reason.clone());
                        }
                    }

                    if let Some(ref stream_usage) = chunk.usage {
                        usage.input = stream_usage.prompt_tokens;
                        usage.output = stream_usage.completion_tokens;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: describe_sse_error(e),
                    };
                    return;
                }
            }
        }
        event_source.close();

        let mut content = Vec::new();
        if !accumulated_text.is_empty() {
            content.push(Content::Text { text: accumulated_text });
        }
        for (id, name, args) in tool_calls {
            if !name.is_empty() {
                let arguments = if args.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&args).unwrap_or(serde_json::Value::String(args))
                };
                content.push(Content::ToolCall { id, name, arguments });
            }
        }

        let stop_reason = match finish_reason.as_deref() {
            Some("length") => StopReason::Length,
            Some("tool_calls") => StopReason::ToolUse,
            _ => StopReason::Stop,
        };

        let final_message = Message::Assistant {
            content,
            metadata: AssistantMetadata {
                provider: Some(model.provider),
                model: Some(model.id.clone()),
                usage: usage.clone(),
                stop_reason: Some(stop_reason),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        };

        yield MessageEvent::Done {
            message: final_message,
            stop_reason,
            usage,
        };
    }
}

// Request types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: i32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Upper bound on tool calls in one streamed response
const MAX_STREAMED_TOOL_CALLS: usize = 128;

/// Slot for a streamed tool-call delta, growing the list as needed.
/// Negative or oversized indices from the wire yield `None`.
fn tool_call_slot(tool_calls: &mut Vec<(String, String, String)>, index: i32) -> Option<usize> {
    let idx = usize::try_from(index)
        .ok()
        .filter(|&i| i < MAX_STREAMED_TOOL_CALLS)?;
    if tool_calls.len() <= idx {
        tool_calls.resize_with(idx + 1, Default::default);
    }
    Some(idx)
}
