use std::sync::Arc;

use rusqlite::params;

use muse_clock::{ClockSnapshot, TimeFormat, TimeProvider};

use crate::error::Result;
use crate::manager::DatabaseManager;

/// Persisted clock snapshots. Every clock mutation writes back the base pair
/// and the serialized action chain.
pub struct SessionClockRepository {
    db: Arc<DatabaseManager>,
    clock: Arc<TimeProvider>,
}

impl SessionClockRepository {
    pub fn new(db: Arc<DatabaseManager>, clock: Arc<TimeProvider>) -> Self {
        Self { db, clock }
    }

    pub fn get_by_session_id(&self, session_id: &str) -> Result<Option<ClockSnapshot>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT virtual_base, real_base, actions FROM session_clock WHERE session_id = ?1",
            )?;
            let mut rows = stmt.query_map(params![session_id], |row| {
                Ok(ClockSnapshot {
                    base_virtual: row.get(0)?,
                    base_real: row.get(1)?,
                    actions_json: row.get(2)?,
                })
            })?;
            rows.next().transpose()
        })
        .map_err(Into::into)
    }

    pub fn insert_or_update(
        &self,
        session_id: &str,
        base_virtual: &str,
        base_real: &str,
        actions_json: &str,
    ) -> Result<()> {
        let virtual_now = self.clock.now_str(TimeFormat::Readable, Some(session_id));
        let real_now = self.clock.real_now_str(TimeFormat::Readable);
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO sessions (id, name, created_at, updated_at, real_updated_at)
                 VALUES (?1, ?2, ?3, ?3, ?4)",
                params![session_id, format!("Session {session_id}"), virtual_now, real_now],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO session_clock
                 (session_id, virtual_base, real_base, actions, updated_at, real_updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![session_id, base_virtual, base_real, actions_json, virtual_now, real_now],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn delete_by_session_id(&self, session_id: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed =
                conn.execute("DELETE FROM session_clock WHERE session_id = ?1", params![session_id])?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
        let clock = Arc::new(TimeProvider::new());
        let repo = SessionClockRepository::new(db, clock);

        assert!(repo.get_by_session_id("s1").unwrap().is_none());
        repo.insert_or_update(
            "s1",
            "2030-01-01 00:00:00",
            "2024-01-01 00:00:00",
            r#"[{"type":"offset","value":3600.0}]"#,
        )
        .unwrap();

        let snapshot = repo.get_by_session_id("s1").unwrap().unwrap();
        assert_eq!(snapshot.base_virtual.as_deref(), Some("2030-01-01 00:00:00"));
        assert!(snapshot.actions_json.unwrap().contains("offset"));

        assert!(repo.delete_by_session_id("s1").unwrap());
    }
}
