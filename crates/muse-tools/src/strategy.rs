use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{required_str, Tool, ToolContext, ToolResult, STRATEGY};

/// Records the channel decision and conversation strategy. The flow's output
/// adapter reads this invocation's arguments to route between the speak and
/// telegram nodes.
pub struct Strategy;

#[async_trait]
impl Tool for Strategy {
    fn name(&self) -> &str {
        STRATEGY
    }

    fn description(&self) -> &str {
        "Decide how to respond to the user: choose the communication channel \
         ('speakinperson' or 'telegram') and describe the conversation strategy \
         to follow. Call this exactly once per turn before responding."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "decision": {
                    "type": "string",
                    "enum": ["speakinperson", "telegram"],
                    "description": "Which channel to use for the reply."
                },
                "strategy": {
                    "type": "string",
                    "description": "How to steer the conversation (tone, topics, intent)."
                }
            },
            "required": ["decision", "strategy"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        let decision = match required_str(&input, "decision") {
            Ok(d) => d,
            Err(e) => return e,
        };
        let strategy = input
            .get("strategy")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        match decision {
            "speakinperson" | "telegram" => {
                ToolResult::success(format!("Decision: {decision}. Strategy: {strategy}"))
            }
            other => ToolResult::error(format!(
                "unknown decision '{other}': must be 'speakinperson' or 'telegram'"
            )),
        }
    }
}
