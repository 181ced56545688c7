use async_trait::async_trait;
use serde_json::{json, Value};

use muse_core::types::ScheduleEntry;

use crate::{optional_str, required_str, Tool, ToolContext, ToolResult};

fn render_entries(entries: &[ScheduleEntry]) -> String {
    if entries.is_empty() {
        return "No schedule entries found.".to_string();
    }
    let mut out = format!("Schedule entries ({}):\n", entries.len());
    for entry in entries {
        out.push_str(&format!(
            "- [{} ~ {}] {} (ID:{})\n",
            entry.start_at, entry.end_at, entry.content, entry.entry_id
        ));
    }
    out
}

/// Read access to the character's schedule.
pub struct ScheduleReader;

#[async_trait]
impl Tool for ScheduleReader {
    fn name(&self) -> &str {
        "schedule_reader"
    }

    fn description(&self) -> &str {
        "Read your schedule. Actions: 'list' (everything), 'at_time' (entries \
         covering a time point), 'in_range' (entries overlapping a window), \
         'by_date' (entries touching a date)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "at_time", "in_range", "by_date"]
                },
                "time_point": { "type": "string", "description": "'YYYY-MM-DD HH:MM:SS' for at_time." },
                "start_at": { "type": "string", "description": "Range start for in_range." },
                "end_at": { "type": "string", "description": "Range end for in_range." },
                "date": { "type": "string", "description": "'YYYY-MM-DD' for by_date." }
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
            "list" => ctx.memory.get_schedule_entries(),
            "at_time" => match required_str(&input, "time_point") {
                Ok(t) => ctx.memory.get_schedule_entries_at(t),
                Err(e) => return e,
            },
            "in_range" => {
                match (required_str(&input, "start_at"), required_str(&input, "end_at")) {
                    (Ok(start), Ok(end)) => ctx.memory.get_schedule_entries_in_range(start, end),
                    (Err(e), _) | (_, Err(e)) => return e,
                }
            }
            "by_date" => match required_str(&input, "date") {
                Ok(d) => ctx.memory.get_schedule_entries_by_date(d),
                Err(e) => return e,
            },
            other => return ToolResult::error(format!("unknown action '{other}'")),
        };
        match result {
            Ok(entries) => ToolResult::success(render_entries(&entries)),
            Err(e) => ToolResult::error(format!("schedule lookup failed: {e}")),
        }
    }
}

/// Write access to the character's schedule.
pub struct ScheduleWriter;

#[async_trait]
impl Tool for ScheduleWriter {
    fn name(&self) -> &str {
        "schedule_writer"
    }

    fn description(&self) -> &str {
        "Create, update, or delete schedule entries. Actions: 'add' (requires \
         start_at, end_at, content), 'update' (requires entry_id plus fields to \
         change), 'delete' (requires entry_id)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["add", "update", "delete"] },
                "entry_id": { "type": "string", "description": "Business id, required for update/delete." },
                "start_at": { "type": "string", "description": "'YYYY-MM-DD HH:MM:SS'." },
                "end_at": { "type": "string", "description": "'YYYY-MM-DD HH:MM:SS'." },
                "content": { "type": "string", "description": "What happens in this slot." }
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
                let entry = ScheduleEntry {
                    entry_id: optional_str(&input, "entry_id").unwrap_or_default().to_string(),
                    session_id: ctx.session_id.clone(),
                    start_at: start.to_string(),
                    end_at: end.to_string(),
                    content: content.to_string(),
                    created_at: None,
                };
                match ctx.memory.add_schedule_entry(entry).await {
                    Ok(stored) => ToolResult::success(format!(
                        "Schedule entry added (ID:{}).",
                        stored.entry_id
                    )),
                    Err(e) => ToolResult::error(format!("failed to add schedule entry: {e}")),
                }
            }
            "update" => {
                let entry_id = match required_str(&input, "entry_id") {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match ctx
                    .memory
                    .update_schedule_entry(
                        entry_id,
                        optional_str(&input, "content"),
                        optional_str(&input, "start_at"),
                        optional_str(&input, "end_at"),
                    )
                    .await
                {
                    Ok(true) => ToolResult::success(format!("Schedule entry '{entry_id}' updated.")),
                    Ok(false) => ToolResult::error(format!("schedule entry '{entry_id}' not found")),
                    Err(e) => ToolResult::error(format!("failed to update schedule entry: {e}")),
                }
            }
            "delete" => {
                let entry_id = match required_str(&input, "entry_id") {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match ctx.memory.delete_schedule_entry(entry_id).await {
                    Ok(true) => ToolResult::success(format!("Schedule entry '{entry_id}' deleted.")),
                    Ok(false) => ToolResult::error(format!("schedule entry '{entry_id}' not found")),
                    Err(e) => ToolResult::error(format!("failed to delete schedule entry: {e}")),
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
    async fn writer_then_reader_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);

        let added = ScheduleWriter
            .execute(
                json!({
                    "action": "add",
                    "start_at": "2024-01-15 09:00:00",
                    "end_at": "2024-01-15 10:00:00",
                    "content": "morning run"
                }),
                &ctx,
            )
            .await;
        assert!(!added.is_error, "{}", added.content);

        let listed = ScheduleReader
            .execute(json!({"action": "at_time", "time_point": "2024-01-15 09:30:00"}), &ctx)
            .await;
        assert!(listed.content.contains("morning run"));
    }

    #[tokio::test]
    async fn add_rejects_inverted_window() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let result = ScheduleWriter
            .execute(
                json!({
                    "action": "add",
                    "start_at": "2024-01-15 11:00:00",
                    "end_at": "2024-01-15 10:00:00",
                    "content": "backwards"
                }),
                &ctx,
            )
            .await;
        assert!(result.is_error);
    }
}
