//! Event-to-wire serialization for the streaming boundary.
//!
//! Each `ExecutionEvent` maps to an OpenAI-style `chat.completion.chunk`
//! frame; `final` closes the stream with a finish chunk and the `[DONE]`
//! terminator.

use serde_json::{json, Value};

use muse_core::types::{EventKind, ExecutionEvent};

/// Strip whitespace-only lines from model output so streamed replies don't
/// carry noisy blank lines. Applied to both the SSE token path and the
/// non-streaming gather.
pub fn remove_empty_lines(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    // Single-line chunks pass through untouched so mid-word whitespace in
    // streamed tokens survives.
    if !normalized.contains('\n') {
        return normalized;
    }
    normalized
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn chunk_envelope(response_id: &str, created: i64, model: &str, delta: Value) -> Value {
    json!({
        "id": response_id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": null
        }]
    })
}

/// Wire frames produced for one event. `final` yields the finish chunk plus
/// the `[DONE]` sentinel; suppressed events yield nothing.
pub fn event_to_frames(
    event: &ExecutionEvent,
    response_id: &str,
    created: i64,
    model: &str,
) -> Vec<String> {
    let mut frames = Vec::new();
    match event.kind {
        EventKind::Token => {
            let Some(content) = event.content.as_deref() else {
                return frames;
            };
            let cleaned = remove_empty_lines(content);
            if cleaned.is_empty() {
                return frames;
            }
            let mut delta = json!({ "content": cleaned });
            if let Some(message_type) = &event.message_type {
                delta["tool_event"] = json!({
                    "type": "tool_output",
                    "message_type": message_type,
                    "message_id": event.message_id,
                });
            }
            frames.push(data_frame(&chunk_envelope(response_id, created, model, delta)));
        }
        EventKind::ToolOutput => {
            let Some(content) = event.content.as_deref() else {
                return frames;
            };
            let cleaned = remove_empty_lines(content);
            if cleaned.is_empty() {
                return frames;
            }
            let delta = json!({
                "content": content,
                "tool_event": {
                    "type": "tool_output",
                    "message_type": event.message_type,
                    "message_id": event.message_id,
                }
            });
            frames.push(data_frame(&chunk_envelope(response_id, created, model, delta)));
        }
        EventKind::ToolStatus | EventKind::Step => {
            let delta = json!({ "tool_status": event.content.as_deref().unwrap_or("") });
            frames.push(data_frame(&chunk_envelope(response_id, created, model, delta)));
        }
        EventKind::FlowStep => {
            let mut delta = json!({ "tool_status": event.content.as_deref().unwrap_or("") });
            if let Some(stage) = event.execution_path.last() {
                delta["flow_stage"] = json!(stage);
            }
            frames.push(data_frame(&chunk_envelope(response_id, created, model, delta)));
        }
        EventKind::Error => {
            let message = event.content.as_deref().unwrap_or("unknown error");
            let delta = json!({ "tool_status": format!("❌ {message}") });
            frames.push(data_frame(&chunk_envelope(response_id, created, model, delta)));
        }
        EventKind::Final | EventKind::Done => {
            let finish = json!({
                "id": response_id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": model,
                "choices": [{
                    "index": 0,
                    "delta": {},
                    "finish_reason": "stop"
                }]
            });
            frames.push(data_frame(&finish));
            frames.push("data: [DONE]\n\n".to_string());
        }
    }
    frames
}

fn data_frame(payload: &Value) -> String {
    format!("data: {payload}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_whitespace_only_lines() {
        assert_eq!(remove_empty_lines("a\n\n  \nb"), "a\nb");
        assert_eq!(remove_empty_lines("a\r\n\r\nb"), "a\nb");
        assert_eq!(remove_empty_lines(""), "");
        assert_eq!(remove_empty_lines("plain"), "plain");
    }

    #[test]
    fn token_with_message_type_carries_tool_event_rider() {
        let event = ExecutionEvent::token("hi")
            .with_message_type("speak_in_person")
            .with_message_id("call_1");
        let frames = event_to_frames(&event, "chatcmpl-1", 0, "gpt-4o");
        assert_eq!(frames.len(), 1);
        let payload: Value =
            serde_json::from_str(frames[0].strip_prefix("data: ").unwrap().trim()).unwrap();
        assert_eq!(payload["choices"][0]["delta"]["content"], "hi");
        assert_eq!(
            payload["choices"][0]["delta"]["tool_event"]["message_type"],
            "speak_in_person"
        );
    }

    #[test]
    fn empty_token_is_suppressed() {
        let event = ExecutionEvent::token("  \n  ");
        assert!(event_to_frames(&event, "id", 0, "m").is_empty());
    }

    #[test]
    fn final_emits_finish_and_done() {
        let frames = event_to_frames(&ExecutionEvent::final_event(), "id", 0, "m");
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"finish_reason\":\"stop\""));
        assert_eq!(frames[1], "data: [DONE]\n\n");
    }

    #[test]
    fn error_surfaces_as_flagged_tool_status() {
        let frames = event_to_frames(&ExecutionEvent::error("boom"), "id", 0, "m");
        let payload: Value =
            serde_json::from_str(frames[0].strip_prefix("data: ").unwrap().trim()).unwrap();
        assert_eq!(payload["choices"][0]["delta"]["tool_status"], "❌ boom");
    }
}
