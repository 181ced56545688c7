use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{required_str, Tool, ToolContext, ToolResult, SEND_TELEGRAM_MESSAGE};

/// Text-chat message. The returned content is the message body; the calling
/// agent surfaces it inline and persists it with the TELEGRAM category.
pub struct SendTelegramMessage;

#[async_trait]
impl Tool for SendTelegramMessage {
    fn name(&self) -> &str {
        SEND_TELEGRAM_MESSAGE
    }

    fn description(&self) -> &str {
        "Send the user a chat message on their phone. Use this when you are not \
         physically together or a text fits the moment better than speech."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message text to send."
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        match required_str(&input, "message") {
            Ok(message) => ToolResult::success(message),
            Err(e) => e,
        }
    }
}
