use std::sync::Arc;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use muse_clock::{TimeFormat, TimeProvider};

use crate::error::Result;
use crate::manager::DatabaseManager;

/// One row of the frontend display log. This mirrors what the client rendered,
/// not the LLM transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendMessage {
    #[serde(default)]
    pub id: Option<i64>,
    pub session_id: String,
    pub client_message_id: String,
    pub role: String,
    #[serde(default = "default_kind")]
    pub message_kind: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub input_mode: Option<String>,
    #[serde(default)]
    pub character_id: Option<String>,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_kind() -> String {
    "text".to_string()
}

pub struct FrontendMessageRepository {
    db: Arc<DatabaseManager>,
    clock: Arc<TimeProvider>,
}

impl FrontendMessageRepository {
    pub fn new(db: Arc<DatabaseManager>, clock: Arc<TimeProvider>) -> Self {
        Self { db, clock }
    }

    /// Idempotent on `(session_id, client_message_id)`; a replay updates the
    /// stored row in place.
    pub fn upsert(&self, message: &FrontendMessage) -> Result<i64> {
        let created_at = message.created_at.clone().unwrap_or_else(|| {
            self.clock
                .now_str(TimeFormat::Readable, Some(&message.session_id))
        });
        let real_now = self.clock.real_now_str(TimeFormat::Readable);

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO sessions (id, name, created_at, updated_at, real_updated_at)
                 VALUES (?1, ?2, ?3, ?3, ?4)",
                params![
                    message.session_id,
                    format!("Session {}", message.session_id),
                    created_at,
                    real_now
                ],
            )?;
            tx.execute(
                "INSERT INTO frontend_messages
                 (session_id, client_message_id, role, message_kind, content,
                  tool_name, tool_call_id, input_mode, character_id, display_order, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(session_id, client_message_id) DO UPDATE SET
                   role = excluded.role,
                   message_kind = excluded.message_kind,
                   content = excluded.content,
                   tool_name = excluded.tool_name,
                   tool_call_id = excluded.tool_call_id,
                   input_mode = excluded.input_mode,
                   character_id = excluded.character_id,
                   display_order = excluded.display_order",
                params![
                    message.session_id,
                    message.client_message_id,
                    message.role,
                    message.message_kind,
                    message.content,
                    message.tool_name,
                    message.tool_call_id,
                    message.input_mode,
                    message.character_id,
                    message.display_order,
                    created_at,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(id)
        })
    }

    pub fn list_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<FrontendMessage>> {
        let limit = limit as i64;
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, client_message_id, role, message_kind, content,
                        tool_name, tool_call_id, input_mode, character_id, display_order, created_at
                 FROM frontend_messages
                 WHERE session_id = ?1
                 ORDER BY display_order ASC, created_at ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![session_id, limit], |row| {
                Ok(FrontendMessage {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    client_message_id: row.get(2)?,
                    role: row.get(3)?,
                    message_kind: row.get(4)?,
                    content: row.get(5)?,
                    tool_name: row.get(6)?,
                    tool_call_id: row.get(7)?,
                    input_mode: row.get(8)?,
                    character_id: row.get(9)?,
                    display_order: row.get(10)?,
                    created_at: row.get(11)?,
                })
            })?;
            rows.collect()
        })
        .map_err(Into::into)
    }

    pub fn delete_by_session(&self, session_id: &str) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM frontend_messages WHERE session_id = ?1",
                params![session_id],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replays_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
        let clock = Arc::new(TimeProvider::new());
        let repo = FrontendMessageRepository::new(db, clock);

        let mut msg = FrontendMessage {
            id: None,
            session_id: "s1".to_string(),
            client_message_id: "c1".to_string(),
            role: "user".to_string(),
            message_kind: "text".to_string(),
            content: "first".to_string(),
            tool_name: None,
            tool_call_id: None,
            input_mode: Some("phone".to_string()),
            character_id: None,
            display_order: 1,
            created_at: None,
        };
        repo.upsert(&msg).unwrap();
        msg.content = "edited".to_string();
        repo.upsert(&msg).unwrap();

        let rows = repo.list_by_session("s1", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "edited");

        assert_eq!(repo.delete_by_session("s1").unwrap(), 1);
    }
}
