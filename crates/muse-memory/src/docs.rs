use serde_json::{json, Value};

use muse_storage::{KvEntry, MessageRow, PeriodRow};

pub fn message_doc(session_id: &str, row: &MessageRow) -> Value {
    let msg = &row.message;
    json!({
        "id": row.id,
        "session_id": session_id,
        "role": msg.role.as_str(),
        "content": msg.content.as_deref().unwrap_or(""),
        "tool_name": msg.tool_name.as_deref().unwrap_or(""),
        "speaker": msg.speaker.as_deref().unwrap_or(""),
        "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
        "created_at": msg.created_at.as_deref().unwrap_or(""),
        "category": msg.category.as_i64(),
        "character_ids": msg.visible_for_characters.clone().unwrap_or_default(),
    })
}

pub fn period_doc(row: &PeriodRow) -> Value {
    json!({
        "id": row.id,
        "session_id": row.session_id,
        "period_id": row.period_id,
        "period_type": row.period_type,
        "start_at": row.start_at,
        "end_at": row.end_at,
        "content": row.content,
        "title": row.title,
        "character_id": row.character_id,
        "created_at": row.created_at,
    })
}

pub fn kv_doc(entry: &KvEntry) -> Value {
    json!({
        "id": entry.id,
        "session_id": entry.session_id,
        "key": entry.key,
        "key_type": entry.key_type,
        "metadata": entry.metadata,
        "character_id": entry.character_id,
        "created_at": entry.created_at,
        "updated_at": entry.updated_at,
    })
}
