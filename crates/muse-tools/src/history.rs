use async_trait::async_trait;
use serde_json::{json, Value};

use muse_core::types::{Message, QueryMetadata};

use crate::{optional_str, Tool, ToolContext, ToolResult};

/// Reads back conversation history around a time point, in a range, or on a
/// date. Output is a plain-text digest the model can quote from.
pub struct DialogueHistory;

#[async_trait]
impl Tool for DialogueHistory {
    fn name(&self) -> &str {
        "dialogue_history"
    }

    fn description(&self) -> &str {
        "Look up past conversation. Provide either 'time_point' (with optional \
         'hours'), or 'start_time' and 'end_time', or 'date'. Returns messages \
         in chronological order with timestamps."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "time_point": {
                    "type": "string",
                    "description": "Center of the lookup window, 'YYYY-MM-DD HH:MM:SS'."
                },
                "hours": {
                    "type": "number",
                    "description": "Half-range in hours around time_point (default 1)."
                },
                "start_time": {
                    "type": "string",
                    "description": "Range start, 'YYYY-MM-DD HH:MM:SS'."
                },
                "end_time": {
                    "type": "string",
                    "description": "Range end, 'YYYY-MM-DD HH:MM:SS'."
                },
                "date": {
                    "type": "string",
                    "description": "A whole day, 'YYYY-MM-DD'."
                },
                "max_messages": {
                    "type": "integer",
                    "description": "Cap on returned messages (default 50)."
                }
            }
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let max_messages = input
            .get("max_messages")
            .and_then(|v| v.as_u64())
            .unwrap_or(50) as usize;
        let character_id = ctx.character_id.as_deref();

        let result = if let Some(time_point) = optional_str(&input, "time_point") {
            let hours = input.get("hours").and_then(|v| v.as_f64()).unwrap_or(1.0);
            ctx.memory
                .get_messages_around_time(time_point, hours, max_messages, None, character_id)
        } else if let (Some(start), Some(end)) = (
            optional_str(&input, "start_time"),
            optional_str(&input, "end_time"),
        ) {
            ctx.memory
                .get_messages_in_range(start, end, max_messages, None, character_id)
        } else if let Some(date) = optional_str(&input, "date") {
            ctx.memory
                .get_messages_by_date(date, max_messages, None, character_id)
        } else {
            return ToolResult::error(
                "provide 'time_point', 'start_time'+'end_time', or 'date'",
            );
        };

        match result {
            Ok((messages, meta)) => ToolResult::success(render(&messages, &meta)),
            Err(e) => ToolResult::error(format!("history lookup failed: {e}")),
        }
    }
}

fn render(messages: &[Message], meta: &QueryMetadata) -> String {
    if messages.is_empty() {
        return "No messages found in the requested window.".to_string();
    }
    let mut out = String::new();
    for msg in messages {
        let when = msg.created_at.as_deref().unwrap_or("?");
        let who = msg.speaker.as_deref().unwrap_or(msg.role.as_str());
        let what = msg.content.as_deref().unwrap_or("");
        out.push_str(&format!("[{when}] {who}: {what}\n"));
    }
    if meta.has_more_before {
        out.push_str("(earlier messages exist beyond this window)\n");
    }
    if meta.has_more_after {
        out.push_str("(later messages exist beyond this window)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;
    use muse_core::types::Message as CoreMessage;

    #[tokio::test]
    async fn renders_window_with_speakers() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        ctx.memory
            .add_message(CoreMessage::user("hello there", "2024-01-15 14:00:00"))
            .await
            .unwrap();

        let result = DialogueHistory
            .execute(json!({"time_point": "2024-01-15 14:00:00"}), &ctx)
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("user: hello there"));
    }

    #[tokio::test]
    async fn requires_some_window() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let result = DialogueHistory.execute(json!({}), &ctx).await;
        assert!(result.is_error);
    }
}
