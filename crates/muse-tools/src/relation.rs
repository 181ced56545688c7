use async_trait::async_trait;
use serde_json::{json, Value};

use muse_core::types::Relation;

use crate::{optional_str, required_str, Tool, ToolContext, ToolResult};

fn render_relations(relations: &[Relation]) -> String {
    if relations.is_empty() {
        return "No relationship records found.".to_string();
    }
    let mut out = String::new();
    for rel in relations {
        out.push_str(&format!(
            "------\nrelation_id: {}\nname: {}\nknowledge: {}\nprogress: {}\n",
            rel.relation_id, rel.name, rel.knowledge, rel.progress
        ));
    }
    out
}

/// Manage relationship records: who the character knows, what they know about
/// them, and how the relationship is progressing.
pub struct RelationTool;

#[async_trait]
impl Tool for RelationTool {
    fn name(&self) -> &str {
        "relation_tool"
    }

    fn description(&self) -> &str {
        "Manage relationship records. Actions: 'add' (requires name), 'get' \
         (requires relation_id), 'list', 'update' (requires relation_id plus \
         fields to change), 'delete' (requires relation_id), 'search' \
         (requires keyword)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "get", "list", "update", "delete", "search"]
                },
                "relation_id": { "type": "string" },
                "name": { "type": "string", "description": "Person or entity name." },
                "knowledge": { "type": "string", "description": "What you know about them." },
                "progress": { "type": "string", "description": "Relationship status/progress." },
                "keyword": { "type": "string", "description": "Search term for 'search'." }
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
                let name = match required_str(&input, "name") {
                    Ok(n) => n,
                    Err(e) => return e,
                };
                let relation = Relation {
                    relation_id: optional_str(&input, "relation_id").unwrap_or_default().to_string(),
                    session_id: ctx.session_id.clone(),
                    name: name.to_string(),
                    knowledge: optional_str(&input, "knowledge").unwrap_or_default().to_string(),
                    progress: optional_str(&input, "progress").unwrap_or_default().to_string(),
                    created_at: None,
                };
                match ctx.memory.add_relation(relation).await {
                    Ok(stored) => ToolResult::success(format!(
                        "Relation added (ID:{}).",
                        stored.relation_id
                    )),
                    Err(e) => ToolResult::error(format!("failed to add relation: {e}")),
                }
            }
            "get" => {
                let relation_id = match required_str(&input, "relation_id") {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match ctx.memory.get_relation(relation_id) {
                    Ok(Some(rel)) => ToolResult::success(render_relations(&[rel])),
                    Ok(None) => ToolResult::error(format!("relation '{relation_id}' not found")),
                    Err(e) => ToolResult::error(format!("failed to get relation: {e}")),
                }
            }
            "list" => match ctx.memory.list_relations() {
                Ok(relations) => ToolResult::success(render_relations(&relations)),
                Err(e) => ToolResult::error(format!("failed to list relations: {e}")),
            },
            "update" => {
                let relation_id = match required_str(&input, "relation_id") {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match ctx
                    .memory
                    .update_relation(
                        relation_id,
                        optional_str(&input, "name"),
                        optional_str(&input, "knowledge"),
                        optional_str(&input, "progress"),
                    )
                    .await
                {
                    Ok(Some(_)) => ToolResult::success(format!("Relation '{relation_id}' updated.")),
                    Ok(None) => ToolResult::error(format!("relation '{relation_id}' not found")),
                    Err(e) => ToolResult::error(format!("failed to update relation: {e}")),
                }
            }
            "delete" => {
                let relation_id = match required_str(&input, "relation_id") {
                    Ok(id) => id,
                    Err(e) => return e,
                };
                match ctx.memory.delete_relation(relation_id).await {
                    Ok(true) => ToolResult::success(format!("Relation '{relation_id}' deleted.")),
                    Ok(false) => ToolResult::error(format!("relation '{relation_id}' not found")),
                    Err(e) => ToolResult::error(format!("failed to delete relation: {e}")),
                }
            }
            "search" => {
                let keyword = match required_str(&input, "keyword") {
                    Ok(k) => k,
                    Err(e) => return e,
                };
                match ctx.memory.search_relations(keyword) {
                    Ok(relations) => ToolResult::success(render_relations(&relations)),
                    Err(e) => ToolResult::error(format!("failed to search relations: {e}")),
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
    async fn add_list_search() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let added = RelationTool
            .execute(
                json!({"action": "add", "name": "Ann", "knowledge": "studies physics"}),
                &ctx,
            )
            .await;
        assert!(!added.is_error, "{}", added.content);

        let listed = RelationTool.execute(json!({"action": "list"}), &ctx).await;
        assert!(listed.content.contains("Ann"));

        let found = RelationTool
            .execute(json!({"action": "search", "keyword": "physics"}), &ctx)
            .await;
        assert!(found.content.contains("Ann"));
    }
}
