use std::sync::Arc;

use rusqlite::params;

use muse_clock::{TimeFormat, TimeProvider};

use crate::error::Result;
use crate::manager::DatabaseManager;

const SELECT_COLUMNS: &str =
    "id, session_id, key, key_type, metadata, character_id, created_at, updated_at";

#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub id: i64,
    pub session_id: String,
    pub key: String,
    pub key_type: String,
    pub metadata: String,
    pub character_id: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Typed key-value rows. Uniqueness is per `(session_id, key)`; a NULL
/// character_id addresses the shared, unscoped space.
pub struct KvRepository {
    db: Arc<DatabaseManager>,
    clock: Arc<TimeProvider>,
}

impl KvRepository {
    pub fn new(db: Arc<DatabaseManager>, clock: Arc<TimeProvider>) -> Self {
        Self { db, clock }
    }

    pub fn insert(
        &self,
        session_id: &str,
        key: &str,
        metadata: &str,
        key_type: &str,
        character_id: Option<&str>,
        created_at: Option<&str>,
    ) -> Result<i64> {
        let timestamp = created_at
            .map(str::to_string)
            .unwrap_or_else(|| self.clock.now_str(TimeFormat::Readable, Some(session_id)));
        let real_now = self.clock.real_now_str(TimeFormat::Readable);

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO sessions (id, name, created_at, updated_at, real_updated_at)
                 VALUES (?1, ?2, ?3, ?3, ?4)",
                params![session_id, format!("Session {session_id}"), timestamp, real_now],
            )?;
            tx.execute(
                "INSERT INTO kv (session_id, key, key_type, metadata, character_id,
                                 created_at, updated_at, real_updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)",
                params![session_id, key, key_type, metadata, character_id, timestamp, real_now],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE sessions SET updated_at = ?1, real_updated_at = ?2 WHERE id = ?3",
                params![timestamp, real_now, session_id],
            )?;
            tx.commit()?;
            Ok(id)
        })
    }

    pub fn get_by_key(
        &self,
        session_id: &str,
        key: &str,
        character_id: Option<&str>,
    ) -> Result<Option<KvEntry>> {
        self.db.with_conn(|conn| {
            let (sql, run_scoped) = match character_id {
                Some(_) => (
                    format!(
                        "SELECT {SELECT_COLUMNS} FROM kv
                         WHERE session_id = ?1 AND key = ?2 AND character_id = ?3"
                    ),
                    true,
                ),
                None => (
                    format!(
                        "SELECT {SELECT_COLUMNS} FROM kv
                         WHERE session_id = ?1 AND key = ?2 AND character_id IS NULL"
                    ),
                    false,
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = if run_scoped {
                stmt.query_map(params![session_id, key, character_id], row_to_entry)?
            } else {
                stmt.query_map(params![session_id, key], row_to_entry)?
            };
            rows.next().transpose()
        })
        .map_err(Into::into)
    }

    pub fn list_by_session(
        &self,
        session_id: &str,
        key_type: Option<&str>,
        character_id: Option<&str>,
    ) -> Result<Vec<KvEntry>> {
        self.db.with_conn(|conn| {
            let mut sql = format!("SELECT {SELECT_COLUMNS} FROM kv WHERE session_id = ?1");
            if key_type.is_some() {
                sql.push_str(" AND key_type = ?2");
            }
            match character_id {
                Some(_) if key_type.is_some() => sql.push_str(" AND character_id = ?3"),
                Some(_) => sql.push_str(" AND character_id = ?2"),
                None => sql.push_str(" AND character_id IS NULL"),
            }
            sql.push_str(" ORDER BY key ASC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = match (key_type, character_id) {
                (Some(kt), Some(cid)) => stmt.query_map(params![session_id, kt, cid], row_to_entry)?,
                (Some(kt), None) => stmt.query_map(params![session_id, kt], row_to_entry)?,
                (None, Some(cid)) => stmt.query_map(params![session_id, cid], row_to_entry)?,
                (None, None) => stmt.query_map(params![session_id], row_to_entry)?,
            };
            rows.collect()
        })
        .map_err(Into::into)
    }

    /// LIKE search over key and metadata, optionally narrowed by key_type.
    pub fn search_by_keyword(
        &self,
        session_id: &str,
        keyword: &str,
        key_type: Option<&str>,
        character_id: Option<&str>,
    ) -> Result<Vec<KvEntry>> {
        let pattern = format!("%{keyword}%");
        self.db.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {SELECT_COLUMNS} FROM kv
                 WHERE session_id = ?1 AND (key LIKE ?2 OR metadata LIKE ?2)"
            );
            if key_type.is_some() {
                sql.push_str(" AND key_type = ?3");
            }
            match character_id {
                Some(_) if key_type.is_some() => sql.push_str(" AND character_id = ?4"),
                Some(_) => sql.push_str(" AND character_id = ?3"),
                None => sql.push_str(" AND character_id IS NULL"),
            }
            sql.push_str(" ORDER BY key ASC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = match (key_type, character_id) {
                (Some(kt), Some(cid)) => {
                    stmt.query_map(params![session_id, pattern, kt, cid], row_to_entry)?
                }
                (Some(kt), None) => stmt.query_map(params![session_id, pattern, kt], row_to_entry)?,
                (None, Some(cid)) => stmt.query_map(params![session_id, pattern, cid], row_to_entry)?,
                (None, None) => stmt.query_map(params![session_id, pattern], row_to_entry)?,
            };
            rows.collect()
        })
        .map_err(Into::into)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<KvEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM kv WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![id], row_to_entry)?;
            rows.next().transpose()
        })
        .map_err(Into::into)
    }

    /// Every kv row in the working database; feeds the full reindex.
    pub fn all_rows(&self) -> Result<Vec<KvEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM kv ORDER BY id ASC"))?;
            let rows = stmt.query_map([], row_to_entry)?;
            rows.collect()
        })
        .map_err(Into::into)
    }

    pub fn update_metadata(
        &self,
        session_id: &str,
        key: &str,
        metadata: &str,
        character_id: Option<&str>,
    ) -> Result<bool> {
        let virtual_now = self.clock.now_str(TimeFormat::Readable, Some(session_id));
        let real_now = self.clock.real_now_str(TimeFormat::Readable);
        self.db.with_conn(|conn| {
            let changed = match character_id {
                Some(cid) => conn.execute(
                    "UPDATE kv SET metadata = ?1, updated_at = ?2, real_updated_at = ?3
                     WHERE session_id = ?4 AND key = ?5 AND character_id = ?6",
                    params![metadata, virtual_now, real_now, session_id, key, cid],
                )?,
                None => conn.execute(
                    "UPDATE kv SET metadata = ?1, updated_at = ?2, real_updated_at = ?3
                     WHERE session_id = ?4 AND key = ?5 AND character_id IS NULL",
                    params![metadata, virtual_now, real_now, session_id, key],
                )?,
            };
            Ok(changed > 0)
        })
    }

    pub fn delete_by_key(
        &self,
        session_id: &str,
        key: &str,
        character_id: Option<&str>,
    ) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed = match character_id {
                Some(cid) => conn.execute(
                    "DELETE FROM kv WHERE session_id = ?1 AND key = ?2 AND character_id = ?3",
                    params![session_id, key, cid],
                )?,
                None => conn.execute(
                    "DELETE FROM kv WHERE session_id = ?1 AND key = ?2 AND character_id IS NULL",
                    params![session_id, key],
                )?,
            };
            Ok(changed > 0)
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<KvEntry> {
    Ok(KvEntry {
        id: row.get(0)?,
        session_id: row.get(1)?,
        key: row.get(2)?,
        key_type: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        metadata: row.get(4)?,
        character_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, KvRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
        let clock = Arc::new(TimeProvider::new());
        (dir, KvRepository::new(db, clock))
    }

    #[test]
    fn insert_get_update_delete() {
        let (_dir, repo) = setup();
        repo.insert("s1", "relation:r1", "{\"name\":\"Ann\"}", "relation", None, None)
            .unwrap();

        let entry = repo.get_by_key("s1", "relation:r1", None).unwrap().unwrap();
        assert_eq!(entry.key_type, "relation");

        assert!(repo
            .update_metadata("s1", "relation:r1", "{\"name\":\"Anna\"}", None)
            .unwrap());
        let entry = repo.get_by_key("s1", "relation:r1", None).unwrap().unwrap();
        assert!(entry.metadata.contains("Anna"));

        assert!(repo.delete_by_key("s1", "relation:r1", None).unwrap());
        assert!(repo.get_by_key("s1", "relation:r1", None).unwrap().is_none());
    }

    #[test]
    fn character_scope_is_part_of_the_address() {
        let (_dir, repo) = setup();
        repo.insert("s1", "relation:r1", "{}", "relation", Some("char-a"), None)
            .unwrap();
        assert!(repo.get_by_key("s1", "relation:r1", None).unwrap().is_none());
        assert!(repo
            .get_by_key("s1", "relation:r1", Some("char-a"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn keyword_search_scans_key_and_metadata() {
        let (_dir, repo) = setup();
        repo.insert("s1", "relation:r1", "{\"knowledge\":\"plays piano\"}", "relation", None, None)
            .unwrap();
        repo.insert("s1", "relation:r2", "{\"knowledge\":\"sails\"}", "relation", None, None)
            .unwrap();

        let hits = repo
            .search_by_keyword("s1", "piano", Some("relation"), None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "relation:r1");
    }
}
