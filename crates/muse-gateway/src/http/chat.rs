//! Chat and flow completion endpoints.
//!
//! Streaming mode responds with `data: {…}` frames terminated by
//! `data: [DONE]`; non-streaming mode collects the event stream into one
//! OpenAI-shaped body with `tool_outputs` attached to the message.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use muse_agent::{
    presets, ExecutionContext, Runnable, UserAgent, DEFAULT_ROLEPLAY_PROMPT,
    EVENT_CHANNEL_CAPACITY,
};
use muse_core::config::LlmSettings;
use muse_core::types::{EventKind, ExecutionEvent, InputMode};
use muse_flow::{character_flow, lina_flow, sera_flow, FlowSpec};
use muse_llm::LlmClient;
use muse_storage::CharacterRecord;

use crate::app::AppState;
use crate::http::{bad_request, internal_error};
use crate::sse::{event_to_frames, remove_empty_lines};

#[derive(Debug, Deserialize)]
pub struct CharacterInfo {
    pub character_id: String,
    pub name: String,
    #[serde(default)]
    pub roleplay_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub api_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub user_input: String,
    pub input_mode: InputMode,
    #[serde(default)]
    pub stream: bool,
    pub session_id: String,
    #[serde(default)]
    pub character: Option<CharacterInfo>,
    #[serde(default)]
    pub model_info: Option<ModelInfo>,
    #[serde(default)]
    pub participants: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct FlowCompletionRequest {
    #[serde(flatten)]
    pub chat: ChatCompletionRequest,
    #[serde(default = "default_flow_type")]
    pub flow_type: String,
}

fn default_flow_type() -> String {
    "chat_parallel".to_string()
}

struct ResolvedRequest {
    session_id: String,
    user_input: String,
    input_mode: InputMode,
    stream: bool,
    character_name: String,
    roleplay_prompt: String,
    character_id: Option<String>,
    participants: Option<Vec<String>>,
    llm: Arc<LlmClient>,
    model: String,
}

fn resolve(
    state: &AppState,
    request: ChatCompletionRequest,
) -> Result<ResolvedRequest, (StatusCode, Json<Value>)> {
    if request.session_id.trim().is_empty() {
        return Err(bad_request("session_id is required in request body"));
    }
    let user_input = request.user_input.trim().to_string();
    if user_input.is_empty() && request.input_mode != InputMode::Skip {
        return Err(bad_request("user_input is required and cannot be empty"));
    }

    let mut character_name = "Stacy".to_string();
    let mut roleplay_prompt = DEFAULT_ROLEPLAY_PROMPT.to_string();
    let mut character_id = None;
    if let Some(character) = &request.character {
        character_name = character.name.clone();
        if let Some(prompt) = &character.roleplay_prompt {
            roleplay_prompt = prompt.clone();
        }
        character_id = Some(character.character_id.clone());
        // Record the cast in the working database so archives carry it.
        let record = CharacterRecord {
            character_id: character.character_id.clone(),
            name: character.name.clone(),
            roleplay_prompt: Some(roleplay_prompt.clone()),
            avatar: None,
        };
        if let Err(e) = state.characters.upsert_into_archive(&record) {
            warn!(error = %e, "failed to upsert character into working database");
        }
    }

    let (llm, model) = match &request.model_info {
        Some(info) => {
            let settings = LlmSettings {
                model: info.model.clone(),
                base_url: info.base_url.clone(),
                api_key: info.api_key.clone().unwrap_or_default(),
                max_tokens: info.max_tokens.unwrap_or(4096),
                temperature: info.temperature.unwrap_or(1.0),
                api_type: info.api_type.clone().unwrap_or_else(|| "openai".to_string()),
                http_referer: None,
                x_title: None,
            };
            info!(model = %settings.model, "using request-supplied model configuration");
            (state.llms.from_settings(settings), info.model.clone())
        }
        None => {
            let client = state
                .llms
                .get("openai")
                .map_err(|e| bad_request(format!("no usable LLM configuration: {e}")))?;
            let model = client.model().to_string();
            (client, model)
        }
    };

    Ok(ResolvedRequest {
        session_id: request.session_id,
        user_input,
        input_mode: request.input_mode,
        stream: request.stream,
        character_name,
        roleplay_prompt,
        character_id,
        participants: request.participants,
        llm,
        model,
    })
}

fn flow_spec(state: &AppState, resolved: &ResolvedRequest) -> FlowSpec {
    FlowSpec {
        stores: state.stores.clone(),
        session_id: resolved.session_id.clone(),
        name: resolved.character_name.clone(),
        roleplay_prompt: resolved.roleplay_prompt.clone(),
        character_id: resolved.character_id.clone(),
        visible_for_characters: resolved.participants.clone(),
        chat_llm: resolved.llm.clone(),
        infer_llm: resolved.llm.clone(),
    }
}

fn execution_context(resolved: &ResolvedRequest) -> ExecutionContext {
    ExecutionContext::new(resolved.session_id.clone())
        .with_user_input(resolved.user_input.clone())
        .with_character(resolved.character_id.clone())
        .with_visibility(resolved.participants.clone())
        .with_input_mode(resolved.input_mode)
}

/// POST /v1/chat/completions — single character agent (tool-calling).
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let resolved = resolve(&state, request)?;
    info!(
        session_id = %resolved.session_id,
        mode = ?resolved.input_mode,
        stream = resolved.stream,
        "chat completion request"
    );

    let spec = flow_spec(&state, &resolved);
    let agent = presets::character_agent(&spec.agent_spec(resolved.llm.clone()));
    respond(resolved, Box::new(agent)).await
}

/// POST /v1/flow/completions — multi-stage flows, default `chat_parallel`.
pub async fn flow_completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FlowCompletionRequest>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let flow_type = request.flow_type.clone();
    let mut resolved = resolve(&state, request.chat)?;
    info!(
        session_id = %resolved.session_id,
        flow_type = %flow_type,
        stream = resolved.stream,
        "flow completion request"
    );

    let spec = flow_spec(&state, &resolved);
    let runnable: Box<dyn Runnable> = match flow_type.as_str() {
        "chat_parallel" | "lina" => Box::new(lina_flow(&spec)),
        "sera" => Box::new(sera_flow(&spec)),
        "character" => {
            // The bare character flow has no user-intake node; persist the
            // input first the way the lina topology would.
            let mut core = spec.agent_spec(resolved.llm.clone()).core();
            core.name = "user".to_string();
            let mut intake = UserAgent::new(core);
            let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let ctx = execution_context(&resolved);
            let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
            intake
                .run_stream(ctx, tx)
                .await
                .map_err(internal_error)?;
            let _ = drain.await;
            // Input is persisted; the character agents must not ingest it again.
            resolved.user_input.clear();
            Box::new(character_flow(&spec))
        }
        other => return Err(bad_request(format!("unknown flow_type '{other}'"))),
    };

    respond(resolved, runnable).await
}

async fn respond(
    resolved: ResolvedRequest,
    runnable: Box<dyn Runnable>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let ctx = execution_context(&resolved);
    let response_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();

    if resolved.stream {
        Ok(stream_response(runnable, ctx, response_id, created, resolved.model))
    } else {
        gather_response(runnable, ctx, response_id, created, resolved).await
    }
}

fn stream_response(
    mut runnable: Box<dyn Runnable>,
    ctx: ExecutionContext,
    response_id: String,
    created: i64,
    model: String,
) -> Response {
    let (tx, mut rx) = mpsc::channel::<ExecutionEvent>(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        if let Err(e) = runnable.run_stream(ctx, tx).await {
            warn!(error = %e, "streaming runnable failed");
        }
    });

    let body_stream = async_stream::stream! {
        let mut finished = false;
        while let Some(event) = rx.recv().await {
            for frame in event_to_frames(&event, &response_id, created, &model) {
                if frame.contains("[DONE]") {
                    finished = true;
                }
                yield Ok::<_, std::convert::Infallible>(frame);
            }
            if finished {
                return;
            }
        }
        // The producer died without a final event; close the stream cleanly.
        for frame in event_to_frames(&ExecutionEvent::final_event(), &response_id, created, &model) {
            yield Ok(frame);
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .expect("valid SSE response")
}

async fn gather_response(
    mut runnable: Box<dyn Runnable>,
    ctx: ExecutionContext,
    response_id: String,
    created: i64,
    resolved: ResolvedRequest,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let (tx, mut rx) = mpsc::channel::<ExecutionEvent>(EVENT_CHANNEL_CAPACITY);
    let driver = tokio::spawn(async move { runnable.run_stream(ctx, tx).await });

    let mut content_segments: Vec<String> = Vec::new();
    let mut tool_outputs: HashMap<String, Value> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    while let Some(event) = rx.recv().await {
        match event.kind {
            EventKind::Token => {
                let Some(content) = event.content else { continue };
                match event.message_type.as_deref() {
                    Some(message_type) if !muse_tools::is_inline_tool(message_type) => {
                        let key = event
                            .message_id
                            .clone()
                            .unwrap_or_else(|| message_type.to_string());
                        append_tool_output(&mut tool_outputs, &mut order, key, message_type, &content, event.message_id.as_deref());
                    }
                    _ => content_segments.push(content),
                }
            }
            EventKind::ToolOutput => {
                let Some(content) = event.content else { continue };
                match event.message_type.as_deref() {
                    Some(message_type) if muse_tools::is_inline_tool(message_type) => {
                        content_segments.push(content)
                    }
                    Some(message_type) => {
                        let key = event
                            .message_id
                            .clone()
                            .unwrap_or_else(|| message_type.to_string());
                        append_tool_output(&mut tool_outputs, &mut order, key, message_type, &content, event.message_id.as_deref());
                    }
                    None => {}
                }
            }
            EventKind::Final => break,
            _ => {}
        }
    }

    match driver.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(internal_error(e)),
        Err(e) => return Err(internal_error(e)),
    }

    let content = remove_empty_lines(&content_segments.concat())
        .trim()
        .to_string();
    let tool_outputs: Vec<Value> = order
        .iter()
        .filter_map(|key| tool_outputs.get(key))
        .filter(|entry| {
            entry
                .get("content")
                .and_then(|c| c.as_str())
                .map(|c| !c.is_empty())
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    let mut message = json!({ "role": "assistant", "content": content });
    if !tool_outputs.is_empty() {
        message["tool_outputs"] = json!(tool_outputs);
    }

    let body = json!({
        "id": response_id,
        "object": "chat.completion",
        "created": created,
        "model": resolved.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": "stop"
        }],
        "session_id": resolved.session_id,
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

fn append_tool_output(
    outputs: &mut HashMap<String, Value>,
    order: &mut Vec<String>,
    key: String,
    tool_name: &str,
    content: &str,
    tool_call_id: Option<&str>,
) {
    let entry = outputs.entry(key.clone()).or_insert_with(|| {
        order.push(key);
        json!({ "tool_name": tool_name, "content": "", "tool_call_id": tool_call_id })
    });
    let existing = entry["content"].as_str().unwrap_or("").to_string();
    entry["content"] = json!(format!("{existing}{content}"));
}
