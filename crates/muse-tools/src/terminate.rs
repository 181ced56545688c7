use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Tool, ToolContext, ToolResult, TERMINATE};

/// Ends the current agent run. The calling agent transitions to FINISHED
/// when it sees this tool execute.
pub struct Terminate;

#[async_trait]
impl Tool for Terminate {
    fn name(&self) -> &str {
        TERMINATE
    }

    fn description(&self) -> &str {
        "Finish the current turn. Call this once you have nothing further to do."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "description": "Optional completion note."
                }
            }
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        let status = input
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("done");
        ToolResult::success(format!("Interaction finished: {status}"))
    }
}
