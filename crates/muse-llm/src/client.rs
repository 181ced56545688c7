use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use muse_core::config::LlmSettings;
use muse_core::types::{FunctionCall, Message, ToolCall};

use crate::error::{LlmError, Result};
use crate::transcript::validate_and_fix_messages;

const ASK_ATTEMPTS: u32 = 6;
const ASK_BACKOFF_CAP_SECS: u64 = 60;
const ASK_TOOL_ATTEMPTS: u32 = 3;
const ASK_TOOL_BACKOFF_CAP_SECS: u64 = 20;

/// Incremental events surfaced to the caller during a streaming completion.
#[derive(Debug, Clone)]
pub enum DeltaEvent {
    /// Incremental text content.
    Token(String),
    /// Incremental tool-call fragment for the builder at `index`.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// Stream completed; no further deltas follow.
    StreamEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    None,
    Auto,
    Required,
}

impl ToolChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolChoice::None => "none",
            ToolChoice::Auto => "auto",
            ToolChoice::Required => "required",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(ToolChoice::None),
            "auto" => Ok(ToolChoice::Auto),
            "required" => Ok(ToolChoice::Required),
            other => Err(LlmError::Validation(format!("invalid tool_choice: {other}"))),
        }
    }
}

/// Result of a tool-aware completion.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// One configured chat-completion endpoint. Stateless per call; instances are
/// cached per configuration name for connection reuse.
pub struct LlmClient {
    client: reqwest::Client,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(referer) = &settings.http_referer {
            if let Ok(value) = referer.parse() {
                headers.insert("HTTP-Referer", value);
            }
        }
        if let Some(title) = &settings.x_title {
            if let Ok(value) = title.parse() {
                headers.insert("X-Title", value);
            }
        }
        Self {
            client: reqwest::Client::builder()
                .default_headers(headers)
                .build()
                .expect("reqwest client"),
            settings,
        }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn wire_messages(messages: &[Message]) -> Vec<Value> {
        messages.iter().map(Message::to_wire).collect()
    }

    /// Plain text generation. Streams deltas into `on_delta` when provided and
    /// returns the concatenated content. Empty output is an error.
    pub async fn ask(
        &self,
        messages: &[Message],
        stream: bool,
        on_delta: Option<mpsc::Sender<DeltaEvent>>,
    ) -> Result<String> {
        let wire = validate_and_fix_messages(Self::wire_messages(messages));
        retry(ASK_ATTEMPTS, ASK_BACKOFF_CAP_SECS, || {
            self.ask_once(wire.clone(), stream, on_delta.clone())
        })
        .await
    }

    async fn ask_once(
        &self,
        wire: Vec<Value>,
        stream: bool,
        on_delta: Option<mpsc::Sender<DeltaEvent>>,
    ) -> Result<String> {
        let body = json!({
            "model": self.settings.model,
            "messages": wire,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "stream": stream,
        });

        if !stream {
            let resp: ApiResponse = self.post(&body).await?.json().await
                .map_err(|e| LlmError::Parse(e.to_string()))?;
            let content = resp
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            if content.trim().is_empty() {
                return Err(LlmError::EmptyResponse);
            }
            return Ok(content);
        }

        let resp = self.post(&body).await?;
        let (content, _) = consume_stream(resp, on_delta.clone()).await?;
        if let Some(tx) = on_delta {
            let _ = tx.send(DeltaEvent::StreamEnd).await;
        }
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }

    /// Tool-aware completion. `tools` are provider-format schemas. The
    /// transcript validator runs on every call.
    pub async fn ask_tool(
        &self,
        messages: &[Message],
        system_messages: Option<&[Message]>,
        tools: &[Value],
        tool_choice: ToolChoice,
        stream: bool,
        on_delta: Option<mpsc::Sender<DeltaEvent>>,
    ) -> Result<ToolResponse> {
        let mut wire = Vec::new();
        if let Some(system) = system_messages {
            wire.extend(Self::wire_messages(system));
        }
        wire.extend(Self::wire_messages(messages));
        let wire = validate_and_fix_messages(wire);

        if wire.iter().any(|m| m["role"] == "tool") {
            debug!(
                total = wire.len(),
                roles = ?wire.iter().map(|m| m["role"].as_str().unwrap_or("")).collect::<Vec<_>>(),
                "transcript before tool call"
            );
        }

        retry(ASK_TOOL_ATTEMPTS, ASK_TOOL_BACKOFF_CAP_SECS, || {
            self.ask_tool_once(wire.clone(), tools, tool_choice, stream, on_delta.clone())
        })
        .await
    }

    async fn ask_tool_once(
        &self,
        wire: Vec<Value>,
        tools: &[Value],
        tool_choice: ToolChoice,
        stream: bool,
        on_delta: Option<mpsc::Sender<DeltaEvent>>,
    ) -> Result<ToolResponse> {
        let mut body = json!({
            "model": self.settings.model,
            "messages": wire,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!(tool_choice.as_str());
        }

        if !stream {
            let resp: ApiResponse = self.post(&body).await?.json().await
                .map_err(|e| LlmError::Parse(e.to_string()))?;
            let message = resp
                .choices
                .into_iter()
                .next()
                .map(|c| c.message)
                .ok_or(LlmError::EmptyResponse)?;
            let tool_calls = message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| ToolCall {
                    id: tc.id,
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    },
                })
                .collect();
            return Ok(ToolResponse {
                content: message.content.filter(|c| !c.trim().is_empty()),
                tool_calls,
            });
        }

        let resp = self.post(&body).await?;
        let (content, builders) = consume_stream(resp, on_delta.clone()).await?;
        if let Some(tx) = on_delta {
            let _ = tx.send(DeltaEvent::StreamEnd).await;
        }

        let mut tool_calls = Vec::new();
        for (index, builder) in builders {
            let Some(name) = builder.name else { continue };
            tool_calls.push(ToolCall {
                id: builder.id.unwrap_or_else(|| format!("call_{index}")),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name,
                    arguments: if builder.arguments.is_empty() {
                        "{}".to_string()
                    } else {
                        builder.arguments
                    },
                },
            });
        }

        let content = content.trim().to_string();
        Ok(ToolResponse {
            content: (!content.is_empty()).then_some(content),
            tool_calls,
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let mut request = self.client.post(self.endpoint()).json(body);
        if !self.settings.api_key.is_empty() {
            request = request.bearer_auth(&self.settings.api_key);
        }
        let resp = request.send().await?;
        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, body = %message, "provider API error");
            return Err(LlmError::Api { status, message });
        }
        Ok(resp)
    }
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Drain an SSE byte stream: concatenate text deltas, accumulate per-index
/// tool-call builders, stop at `finish_reason`. `data: [DONE]` ends the feed.
async fn consume_stream(
    resp: reqwest::Response,
    on_delta: Option<mpsc::Sender<DeltaEvent>>,
) -> Result<(String, BTreeMap<usize, ToolCallBuilder>)> {
    let mut content = String::new();
    let mut builders: BTreeMap<usize, ToolCallBuilder> = BTreeMap::new();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();
    let mut finished = false;

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk?;
        let Ok(text) = std::str::from_utf8(&chunk) else {
            continue;
        };
        line_buf.push_str(text);

        // Keep the trailing partial line in the buffer.
        let mut lines: Vec<String> = line_buf.split('\n').map(str::to_string).collect();
        line_buf = lines.pop().unwrap_or_default();

        for line in lines {
            let line = line.trim();
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data.trim() == "[DONE]" {
                break 'outer;
            }
            let Ok(frame) = serde_json::from_str::<StreamChunk>(data) else {
                continue;
            };
            for choice in &frame.choices {
                if let Some(text) = &choice.delta.content {
                    if !text.is_empty() {
                        content.push_str(text);
                        if let Some(tx) = &on_delta {
                            if tx.send(DeltaEvent::Token(text.clone())).await.is_err() {
                                break 'outer; // receiver dropped
                            }
                        }
                    }
                }
                if let Some(deltas) = &choice.delta.tool_calls {
                    for delta in deltas {
                        let index = delta.index.unwrap_or(0);
                        let builder = builders.entry(index).or_default();
                        if let Some(id) = &delta.id {
                            builder.id = Some(id.clone());
                        }
                        if let Some(function) = &delta.function {
                            if let Some(name) = &function.name {
                                builder.name = Some(name.clone());
                            }
                            if let Some(arguments) = &function.arguments {
                                builder.arguments.push_str(arguments);
                            }
                        }
                        if let Some(tx) = &on_delta {
                            let event = DeltaEvent::ToolCallDelta {
                                index,
                                id: builder.id.clone(),
                                name: builder.name.clone(),
                                arguments: delta
                                    .function
                                    .as_ref()
                                    .and_then(|f| f.arguments.clone())
                                    .unwrap_or_default(),
                            };
                            if tx.send(event).await.is_err() {
                                break 'outer;
                            }
                        }
                    }
                }
                if choice.finish_reason.is_some() {
                    finished = true;
                }
            }
            if finished {
                break 'outer;
            }
        }
    }

    Ok((content, builders))
}

/// Capped exponential backoff; only retryable error classes re-attempt.
async fn retry<T, F, Fut>(attempts: u32, cap_secs: u64, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = Duration::from_secs(1);
    let cap = Duration::from_secs(cap_secs);
    for attempt in 1..=attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let wait = if let LlmError::RateLimited { retry_after_ms } = &e {
                    Duration::from_millis(*retry_after_ms).min(cap)
                } else {
                    delay
                };
                warn!(attempt, max = attempts, error = %e, "provider call failed, retrying");
                tokio::time::sleep(wait).await;
                delay = (delay * 2).min(cap);
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop returns on final attempt")
}

// Provider wire types

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize)]
struct StreamToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_choice_parse() {
        assert_eq!(ToolChoice::parse("auto").unwrap(), ToolChoice::Auto);
        assert!(ToolChoice::parse("sometimes").is_err());
    }

    #[test]
    fn retryable_classification() {
        assert!(LlmError::RateLimited { retry_after_ms: 100 }.is_retryable());
        assert!(LlmError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!LlmError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!LlmError::Validation("bad".to_string()).is_retryable());
        assert!(!LlmError::EmptyResponse.is_retryable());
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let client = LlmClient::new(LlmSettings {
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1/".to_string(),
            api_key: String::new(),
            max_tokens: 4096,
            temperature: 1.0,
            api_type: "openai".to_string(),
            http_referer: None,
            x_title: None,
        });
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");
    }
}
