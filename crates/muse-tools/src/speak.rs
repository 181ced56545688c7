use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{required_str, Tool, ToolContext, ToolResult, SPEAK_IN_PERSON};

/// Face-to-face speech. The returned content is the spoken line itself; the
/// calling agent surfaces it inline and persists it with the
/// SPEAK_IN_PERSON category.
pub struct SpeakInPerson;

#[async_trait]
impl Tool for SpeakInPerson {
    fn name(&self) -> &str {
        SPEAK_IN_PERSON
    }

    fn description(&self) -> &str {
        "Say something to the user face to face. Use this when you are physically \
         present with the user and want to speak out loud."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "What to say, in character."
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
