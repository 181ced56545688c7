use async_trait::async_trait;
use serde_json::{json, Value};

use muse_core::types::Scenario;

use crate::{optional_str, required_str, Tool, ToolContext, ToolResult};

fn render_scenarios(scenarios: &[Scenario]) -> String {
    if scenarios.is_empty() {
        return "No scenarios found.".to_string();
    }
    let mut out = format!("Scenarios ({}):\n", scenarios.len());
    for sc in scenarios {
        let id = sc.scenario_id.as_deref().unwrap_or("?");
        let label = if sc.title.is_empty() { &sc.content } else { &sc.title };
        out.push_str(&format!(
            "- [{} ~ {}] {} (ID:{})\n",
            sc.start_at, sc.end_at, label, id
        ));
        if !sc.title.is_empty() && !sc.content.is_empty() {
            out.push_str(&format!("  {}\n", sc.content));
        }
    }
    out
}

/// Read access to scenario windows.
pub struct ScenarioReader;

#[async_trait]
impl Tool for ScenarioReader {
    fn name(&self) -> &str {
        "scenario_reader"
    }

    fn description(&self) -> &str {
        "Read scenario windows. Actions: 'list', 'at_time' (scenarios covering \
         a time point), 'in_range' (scenarios overlapping a window), 'by_date', \
         'get' (one scenario by id)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "at_time", "in_range", "by_date", "get"]
                },
                "scenario_id": { "type": "string" },
                "time_point": { "type": "string" },
                "start_at": { "type": "string" },
                "end_at": { "type": "string" },
                "date": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let action = match required_str(&input, "action") {
            Ok(a) => a,
            Err(e) => return e,
        };
        let result = match action {
            "list" => ctx.memory.list_scenarios(),
            "at_time" => match required_str(&input, "time_point") {
                Ok(t) => ctx.memory.get_scenarios_at(t),
                Err(e) => return e,
            },
            "in_range" => {
                match (required_str(&input, "start_at"), required_str(&input, "end_at")) {
                    (Ok(start), Ok(end)) => ctx.memory.get_scenarios_in_range(start, end),
                    (Err(e), _) | (_, Err(e)) => return e,
                }
            }
            "by_date" => match required_str(&input, "date") {
                Ok(d) => ctx.memory.get_scenarios_by_date(d),
                Err(e) => return e,
            },
            "get" => match required_str(&input, "scenario_id") {
                Ok(id) => match ctx.memory.get_scenario(id) {
                    Ok(Some(sc)) => Ok(vec![sc]),
                    Ok(None) => Ok(vec![]),
                    Err(e) => Err(e),
                },
                Err(e) => return e,
            },
            other => return ToolResult::error(format!("unknown action '{other}'")),
        };
        match result {
            Ok(scenarios) => ToolResult::success(render_scenarios(&scenarios)),
            Err(e) => ToolResult::error(format!("scenario lookup failed: {e}")),
        }
    }
}

/// Write access to scenario windows.
pub struct ScenarioWriter;

#[async_trait]
impl Tool for ScenarioWriter {
    fn name(&self) -> &str {
        "scenario_writer"
    }

    fn description(&self) -> &str {
        "Create, update, or delete scenario windows. Actions: 'add' (requires \
         start_at, end_at, content; title optional), 'update' (requires \
         scenario_id plus fields to change), 'delete' (requires scenario_id)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["add", "update", "delete"] },
                "scenario_id": { "type": "string" },
                "start_at": { "type": "string" },
                "end_at": { "type": "string" },
                "content": { "type": "string" },
                "title": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let action = match required_str(&input, "action") {
            Ok(a) => a,
            Err(e) => return e,
        };
        match action {
            "add" => {
                let (start, end, content) = match (
                    required_str(&input, "start_at"),
                    required_str(&input, "end_at"),
                    required_str(&input, "content"),
                ) {
                    (Ok(s), Ok(e), Ok(c)) => (s, e, c),
                    (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e,
                };
                if start > end {
                    return ToolResult::error("start_at must not be after end_at");
                }
                let scenario = Scenario {
                    session_id: ctx.session_id.clone(),
                    scenario_id: optional_str(&input, "scenario_id").map(str::to_string),
                    start_at: start.to_string(),
                    end_at: end.to_string(),
                    content: content.to_string(),
                    title: optional_str(&input, "title").unwrap_or_default().to_string(),
                    created_at: None,
                };
                match ctx.memory.add_scenario(scenario).await {
                    Ok(stored) => ToolResult::success(format!(
                        "Scenario added (ID:{}).",
                        stored.scenario_id.as_deref().unwrap_or("?")
                    )),
                    Err(e) => ToolResult::error(format!("failed to add scenario: {e}")),
                }
            }
            "update" => {
                let scenario_id = match required_str(&input, "scenario_id") {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match ctx
                    .memory
                    .update_scenario(
                        scenario_id,
                        optional_str(&input, "content"),
                        optional_str(&input, "start_at"),
                        optional_str(&input, "end_at"),
                        optional_str(&input, "title"),
                    )
                    .await
                {
                    Ok(true) => ToolResult::success(format!("Scenario '{scenario_id}' updated.")),
                    Ok(false) => ToolResult::error(format!("scenario '{scenario_id}' not found")),
                    Err(e) => ToolResult::error(format!("failed to update scenario: {e}")),
                }
            }
            "delete" => {
                let scenario_id = match required_str(&input, "scenario_id") {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match ctx.memory.delete_scenario(scenario_id).await {
                    Ok(true) => ToolResult::success(format!("Scenario '{scenario_id}' deleted.")),
                    Ok(false) => ToolResult::error(format!("scenario '{scenario_id}' not found")),
                    Err(e) => ToolResult::error(format!("failed to delete scenario: {e}")),
                }
            }
            other => ToolResult::error(format!("unknown action '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;

    #[tokio::test]
    async fn add_then_get_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let added = ScenarioWriter
            .execute(
                json!({
                    "action": "add",
                    "start_at": "2024-01-15 20:00:00",
                    "end_at": "2024-01-15 23:00:00",
                    "content": "dinner party at the loft",
                    "title": "Dinner"
                }),
                &ctx,
            )
            .await;
        assert!(!added.is_error, "{}", added.content);

        let listed = ScenarioReader
            .execute(json!({"action": "at_time", "time_point": "2024-01-15 21:00:00"}), &ctx)
            .await;
        assert!(listed.content.contains("Dinner"));
    }
}
