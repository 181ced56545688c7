use async_trait::async_trait;
use serde_json::{json, Value};

use muse_core::types::{Message, MessageCategory};

use crate::{required_str, Tool, ToolContext, ToolResult};

/// Silent inner reflection. The thought is persisted as an assistant message
/// with the THOUGHT category and never shown to the user directly.
pub struct Reflection;

#[async_trait]
impl Tool for Reflection {
    fn name(&self) -> &str {
        "reflection"
    }

    fn description(&self) -> &str {
        "Record a private inner thought about the conversation, the user, or \
         your own plans. The user never sees reflections; they become part of \
         your long-term memory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "The reflection to record."
                }
            },
            "required": ["thought"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let thought = match required_str(&input, "thought") {
            Ok(t) => t,
            Err(e) => return e,
        };
        let message = Message::assistant(thought, ctx.memory.current_time())
            .with_speaker(&ctx.speaker)
            .with_category(MessageCategory::Thought)
            .with_visibility(ctx.character_id.clone().map(|c| vec![c]));
        match ctx.memory.add_message(message).await {
            Ok(_) => ToolResult::success("Reflection recorded."),
            Err(e) => ToolResult::error(format!("failed to record reflection: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;

    #[tokio::test]
    async fn reflection_persists_a_thought() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let result = Reflection
            .execute(json!({"thought": "the user seems tired"}), &ctx)
            .await;
        assert!(!result.is_error);

        let (messages, _) = ctx
            .memory
            .get_messages_around_time(
                &ctx.memory.current_time(),
                1.0,
                10,
                Some(&[MessageCategory::Thought.as_i64()]),
                None,
            )
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.as_deref(), Some("the user seems tired"));
    }
}
