//! Pre-flight transcript repair.
//!
//! The provider requires every `role=tool` row to follow an assistant message
//! that declared the matching `tool_call_id`, and rejects assistant messages
//! whose `tool_calls` never received replies. Memory queries that filter by
//! category can break both rules, so every outgoing transcript is normalised
//! here. Repairs are logged at WARN and never raised.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

fn call_ids(msg: &Value) -> Vec<String> {
    msg.get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| c.get("id").and_then(|id| id.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn role_of(msg: &Value) -> &str {
    msg.get("role").and_then(|r| r.as_str()).unwrap_or("")
}

/// Normalise a wire-format message list so assistant↔tool pairing holds.
///
/// 1. The first assistant declaring a tool_call id claims it.
/// 2. Orphaned `tool_calls` entries are dropped, except on the last assistant
///    message, which may still be waiting for its tool outputs.
/// 3. `role=tool` rows without an earlier claiming assistant are dropped.
/// 4. An assistant left with zero paired tool_calls is removed entirely
///    unless it is the last assistant.
pub fn validate_and_fix_messages(messages: Vec<Value>) -> Vec<Value> {
    if messages.is_empty() {
        return messages;
    }

    // First pass: who claims each tool_call id, and which ids got replies.
    let mut id_to_assistant: HashMap<String, usize> = HashMap::new();
    let mut replied_ids: HashMap<usize, HashSet<String>> = HashMap::new();

    for (i, msg) in messages.iter().enumerate() {
        match role_of(msg) {
            "assistant" => {
                for id in call_ids(msg) {
                    id_to_assistant.entry(id).or_insert(i);
                }
            }
            "tool" => {
                if let Some(id) = msg.get("tool_call_id").and_then(|v| v.as_str()) {
                    if let Some(&assistant_idx) = id_to_assistant.get(id) {
                        replied_ids
                            .entry(assistant_idx)
                            .or_default()
                            .insert(id.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    let last_assistant = messages
        .iter()
        .rposition(|msg| role_of(msg) == "assistant");

    // Second pass: rebuild the list.
    let mut validated = Vec::with_capacity(messages.len());
    let mut orphaned_tools = 0usize;
    let mut fixed_assistants = 0usize;

    for (i, msg) in messages.into_iter().enumerate() {
        match role_of(&msg) {
            "assistant" => {
                let has_calls = msg
                    .get("tool_calls")
                    .and_then(|v| v.as_array())
                    .map(|calls| !calls.is_empty())
                    .unwrap_or(false);
                if !has_calls {
                    validated.push(msg);
                    continue;
                }
                let empty = HashSet::new();
                let replied = replied_ids.get(&i).unwrap_or(&empty);
                let original_calls = msg
                    .get("tool_calls")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                let kept: Vec<Value> = original_calls
                    .iter()
                    .filter(|c| {
                        c.get("id")
                            .and_then(|id| id.as_str())
                            .map(|id| replied.contains(id))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();

                if !kept.is_empty() {
                    if kept.len() < original_calls.len() {
                        fixed_assistants += 1;
                        warn!(
                            index = i,
                            dropped = original_calls.len() - kept.len(),
                            "dropped orphaned tool_calls from assistant message"
                        );
                    }
                    let mut msg = msg;
                    msg["tool_calls"] = Value::Array(kept);
                    validated.push(msg);
                } else if Some(i) == last_assistant {
                    // Still in progress; its tool outputs may arrive this step.
                    debug!(index = i, "keeping last assistant with pending tool_calls");
                    validated.push(msg);
                } else {
                    fixed_assistants += 1;
                    warn!(index = i, "removed assistant message with fully orphaned tool_calls");
                }
            }
            "tool" => {
                let paired = msg
                    .get("tool_call_id")
                    .and_then(|v| v.as_str())
                    .and_then(|id| id_to_assistant.get(id).map(|aidx| (id, *aidx)))
                    .map(|(id, aidx)| {
                        replied_ids
                            .get(&aidx)
                            .map(|set| set.contains(id))
                            .unwrap_or(false)
                    })
                    .unwrap_or(false);
                if paired {
                    validated.push(msg);
                } else {
                    orphaned_tools += 1;
                    warn!(index = i, "skipped orphaned tool message");
                }
            }
            _ => validated.push(msg),
        }
    }

    if orphaned_tools > 0 || fixed_assistants > 0 {
        warn!(
            orphaned_tools,
            fixed_assistants,
            final_len = validated.len(),
            "repaired message sequence before provider call"
        );
    }

    validated
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assistant_with_calls(ids: &[&str]) -> Value {
        json!({
            "role": "assistant",
            "content": null,
            "tool_calls": ids.iter().map(|id| json!({
                "id": id,
                "type": "function",
                "function": {"name": "t", "arguments": "{}"}
            })).collect::<Vec<_>>()
        })
    }

    fn tool_reply(id: &str) -> Value {
        json!({"role": "tool", "tool_call_id": id, "content": "ok"})
    }

    #[test]
    fn drops_unreplied_call_on_non_final_assistant() {
        let messages = vec![
            assistant_with_calls(&["A", "B"]),
            tool_reply("A"),
            json!({"role": "assistant", "content": "done"}),
        ];
        let fixed = validate_and_fix_messages(messages);
        assert_eq!(fixed.len(), 3);
        let calls = fixed[0]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["id"], "A");
    }

    #[test]
    fn keeps_last_assistant_in_progress() {
        let messages = vec![
            json!({"role": "user", "content": "hi"}),
            assistant_with_calls(&["A"]),
        ];
        let fixed = validate_and_fix_messages(messages);
        assert_eq!(fixed.len(), 2);
        assert_eq!(fixed[1]["tool_calls"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn removes_fully_orphaned_intermediate_assistant() {
        let messages = vec![
            assistant_with_calls(&["A"]),
            json!({"role": "user", "content": "next"}),
            json!({"role": "assistant", "content": "reply"}),
        ];
        let fixed = validate_and_fix_messages(messages);
        assert_eq!(fixed.len(), 2);
        assert_eq!(fixed[0]["role"], "user");
    }

    #[test]
    fn drops_orphaned_tool_rows() {
        let messages = vec![
            json!({"role": "user", "content": "hi"}),
            tool_reply("ghost"),
            json!({"role": "assistant", "content": "reply"}),
        ];
        let fixed = validate_and_fix_messages(messages);
        assert_eq!(fixed.len(), 2);
        assert!(fixed.iter().all(|m| m["role"] != "tool"));
    }

    #[test]
    fn tool_before_its_assistant_is_orphaned() {
        let messages = vec![
            tool_reply("A"),
            assistant_with_calls(&["A"]),
        ];
        let fixed = validate_and_fix_messages(messages);
        // The early tool row is dropped; the assistant is last so kept as-is.
        assert_eq!(fixed.len(), 1);
        assert_eq!(fixed[0]["role"], "assistant");
    }

    #[test]
    fn first_assistant_claims_duplicate_ids() {
        let messages = vec![
            assistant_with_calls(&["A"]),
            tool_reply("A"),
            assistant_with_calls(&["A"]),
            json!({"role": "assistant", "content": "final"}),
        ];
        let fixed = validate_and_fix_messages(messages);
        // Second assistant's claim of "A" is orphaned (first claimed it).
        assert_eq!(fixed.len(), 3);
        assert!(fixed[1]["tool_calls"].is_null() || fixed[1]["role"] == "tool");
    }

    #[test]
    fn plain_conversation_untouched() {
        let messages = vec![
            json!({"role": "system", "content": "s"}),
            json!({"role": "user", "content": "u"}),
            json!({"role": "assistant", "content": "a"}),
        ];
        let fixed = validate_and_fix_messages(messages.clone());
        assert_eq!(fixed, messages);
    }
}
