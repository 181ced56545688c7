use std::sync::Arc;

use rusqlite::params;
use serde::Serialize;

use muse_clock::{TimeFormat, TimeProvider};

use crate::error::Result;
use crate::manager::DatabaseManager;

#[derive(Debug, Clone, Serialize)]
pub struct SessionRow {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
    pub real_updated_at: String,
    /// Aggregates every category, system and tool rows included.
    pub message_count: i64,
}

/// Session rows. Sessions are auto-created on first write by every store.
pub struct SessionRepository {
    db: Arc<DatabaseManager>,
    clock: Arc<TimeProvider>,
}

impl SessionRepository {
    pub fn new(db: Arc<DatabaseManager>, clock: Arc<TimeProvider>) -> Self {
        Self { db, clock }
    }

    /// Insert the session if missing, then bump its virtual timestamp.
    pub fn ensure_session(&self, session_id: &str) -> Result<()> {
        let virtual_now = self.clock.now_str(TimeFormat::Readable, Some(session_id));
        let real_now = self.clock.real_now_str(TimeFormat::Readable);
        let name = format!("Session {session_id}");
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sessions (id, name, created_at, updated_at, real_updated_at)
                 VALUES (?1, ?2, ?3, ?3, ?4)",
                params![session_id, name, virtual_now, real_now],
            )?;
            Ok(())
        })
    }

    /// Bump the session's virtual `updated_at`; called after every mutation.
    pub fn touch(&self, session_id: &str) -> Result<()> {
        let virtual_now = self.clock.now_str(TimeFormat::Readable, Some(session_id));
        let real_now = self.clock.real_now_str(TimeFormat::Readable);
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET updated_at = ?1, real_updated_at = ?2 WHERE id = ?3",
                params![virtual_now, real_now, session_id],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, session_id: &str) -> Result<Option<SessionRow>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.name, s.created_at, s.updated_at, s.real_updated_at,
                        (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id)
                 FROM sessions s WHERE s.id = ?1",
            )?;
            let mut rows = stmt.query_map(params![session_id], row_to_session)?;
            rows.next().transpose()
        })
        .map_err(Into::into)
    }

    pub fn list(&self) -> Result<Vec<SessionRow>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.name, s.created_at, s.updated_at, s.real_updated_at,
                        (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id)
                 FROM sessions s
                 ORDER BY s.updated_at DESC",
            )?;
            let rows = stmt.query_map([], row_to_session)?;
            rows.collect()
        })
        .map_err(Into::into)
    }

    pub fn delete(&self, session_id: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(changed > 0)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        real_updated_at: row.get(4)?,
        message_count: row.get(5)?,
    })
}
