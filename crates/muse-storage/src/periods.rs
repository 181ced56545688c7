use std::sync::Arc;

use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter};

use muse_clock::{TimeFormat, TimeProvider};

use crate::error::Result;
use crate::manager::DatabaseManager;

pub const PERIOD_TYPE_SCENARIO: &str = "scenario";
pub const PERIOD_TYPE_SCHEDULE: &str = "schedule";
pub const PERIOD_TYPE_EVENT: &str = "event";

const SELECT_COLUMNS: &str =
    "id, session_id, period_id, period_type, start_at, end_at, created_at, content, title, character_id";

/// One row of the unified period table (scenario / schedule / event).
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodRow {
    pub id: i64,
    pub session_id: String,
    pub period_id: String,
    pub period_type: String,
    pub start_at: String,
    pub end_at: String,
    pub created_at: Option<String>,
    pub content: String,
    pub title: String,
    pub character_id: Option<String>,
}

/// Unified storage for scenarios, schedule entries, and events. A period
/// covers T when `start_at <= T <= end_at`; it overlaps `[A, B]` when
/// `start_at <= B && end_at >= A`.
pub struct PeriodRepository {
    db: Arc<DatabaseManager>,
    clock: Arc<TimeProvider>,
}

impl PeriodRepository {
    pub fn new(db: Arc<DatabaseManager>, clock: Arc<TimeProvider>) -> Self {
        Self { db, clock }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        session_id: &str,
        period_id: &str,
        period_type: &str,
        start_at: &str,
        end_at: &str,
        content: &str,
        title: &str,
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
                "INSERT INTO period (session_id, period_id, period_type, start_at, end_at,
                                     content, title, character_id, created_at, real_updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    session_id, period_id, period_type, start_at, end_at,
                    content, title, character_id, timestamp, real_now,
                ],
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

    pub fn list_by_session(
        &self,
        session_id: &str,
        period_type: Option<&str>,
        character_id: Option<&str>,
    ) -> Result<Vec<PeriodRow>> {
        self.query(
            session_id,
            period_type,
            character_id,
            "",
            &[],
        )
    }

    /// Periods covering a specific time point.
    pub fn find_by_time(
        &self,
        session_id: &str,
        time_point: &str,
        period_type: Option<&str>,
        character_id: Option<&str>,
    ) -> Result<Vec<PeriodRow>> {
        self.query(
            session_id,
            period_type,
            character_id,
            "AND start_at <= ?N AND end_at >= ?N",
            &[time_point, time_point],
        )
    }

    /// Periods overlapping `[start_at, end_at]`.
    pub fn find_by_time_range(
        &self,
        session_id: &str,
        start_at: &str,
        end_at: &str,
        period_type: Option<&str>,
        character_id: Option<&str>,
    ) -> Result<Vec<PeriodRow>> {
        self.query(
            session_id,
            period_type,
            character_id,
            "AND start_at <= ?N AND end_at >= ?N",
            &[end_at, start_at],
        )
    }

    /// Periods whose start or end falls on the given date.
    pub fn find_by_date(
        &self,
        session_id: &str,
        date: &str,
        period_type: Option<&str>,
        character_id: Option<&str>,
    ) -> Result<Vec<PeriodRow>> {
        self.query(
            session_id,
            period_type,
            character_id,
            "AND (date(start_at) = date(?N) OR date(end_at) = date(?N))",
            &[date, date],
        )
    }

    /// Every period row in the working database; feeds the full reindex.
    pub fn all_rows(&self) -> Result<Vec<PeriodRow>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM period ORDER BY id ASC"))?;
            let rows = stmt.query_map([], row_to_period)?;
            rows.collect()
        })
        .map_err(Into::into)
    }

    pub fn get_by_period_id(&self, period_id: &str) -> Result<Option<PeriodRow>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM period WHERE period_id = ?1"
            ))?;
            let mut rows = stmt.query_map(params![period_id], row_to_period)?;
            rows.next().transpose()
        })
        .map_err(Into::into)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<PeriodRow>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM period WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![id], row_to_period)?;
            rows.next().transpose()
        })
        .map_err(Into::into)
    }

    pub fn update_by_period_id(
        &self,
        period_id: &str,
        content: Option<&str>,
        start_at: Option<&str>,
        end_at: Option<&str>,
        title: Option<&str>,
    ) -> Result<bool> {
        let mut updates = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();
        let mut index = 1;
        for (column, value) in [
            ("content", content),
            ("start_at", start_at),
            ("end_at", end_at),
            ("title", title),
        ] {
            if let Some(value) = value {
                updates.push(format!("{column} = ?{index}"));
                values.push(Box::new(value.to_string()));
                index += 1;
            }
        }
        if updates.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "UPDATE period SET {} WHERE period_id = ?{index}",
            updates.join(", ")
        );
        values.push(Box::new(period_id.to_string()));

        self.db.with_conn(|conn| {
            let changed = conn.execute(&sql, params_from_iter(values.iter().map(|v| &**v)))?;
            Ok(changed > 0)
        })
    }

    pub fn delete_by_period_id(&self, period_id: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM period WHERE period_id = ?1", params![period_id])?;
            Ok(changed > 0)
        })
    }

    /// Shared condition assembly. `extra_sql` uses `?N` markers that are
    /// rewritten to sequential placeholders; `character_id = NULL` requests
    /// rows without a character scope.
    fn query(
        &self,
        session_id: &str,
        period_type: Option<&str>,
        character_id: Option<&str>,
        extra_sql: &str,
        extra_params: &[&str],
    ) -> Result<Vec<PeriodRow>> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM period WHERE session_id = ?1");
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(session_id.to_string())];
        let mut index = 2;

        let mut extra = extra_sql.to_string();
        for param in extra_params {
            extra = extra.replacen("?N", &format!("?{index}"), 1);
            values.push(Box::new(param.to_string()));
            index += 1;
        }
        if !extra.is_empty() {
            sql.push(' ');
            sql.push_str(&extra);
        }

        if let Some(period_type) = period_type {
            sql.push_str(&format!(" AND period_type = ?{index}"));
            values.push(Box::new(period_type.to_string()));
            index += 1;
        }
        match character_id {
            Some(character_id) => {
                sql.push_str(&format!(" AND character_id = ?{index}"));
                values.push(Box::new(character_id.to_string()));
            }
            None => sql.push_str(" AND character_id IS NULL"),
        }
        sql.push_str(" ORDER BY start_at ASC");

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter().map(|v| &**v)), row_to_period)?;
            rows.collect()
        })
        .map_err(Into::into)
    }
}

fn row_to_period(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeriodRow> {
    Ok(PeriodRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        period_id: row.get(2)?,
        period_type: row.get(3)?,
        start_at: row.get(4)?,
        end_at: row.get(5)?,
        created_at: row.get(6)?,
        content: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        title: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        character_id: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PeriodRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
        let clock = Arc::new(TimeProvider::new());
        (dir, PeriodRepository::new(db, clock))
    }

    fn add(repo: &PeriodRepository, period_id: &str, kind: &str, start: &str, end: &str) {
        repo.insert("s1", period_id, kind, start, end, "content", "title", None, None)
            .unwrap();
    }

    #[test]
    fn covers_is_inclusive_on_both_ends() {
        let (_dir, repo) = setup();
        add(&repo, "p1", PERIOD_TYPE_SCHEDULE, "2024-01-15 10:00:00", "2024-01-15 12:00:00");

        for t in ["2024-01-15 10:00:00", "2024-01-15 11:00:00", "2024-01-15 12:00:00"] {
            let found = repo.find_by_time("s1", t, Some(PERIOD_TYPE_SCHEDULE), None).unwrap();
            assert_eq!(found.len(), 1, "expected coverage at {t}");
        }
        let outside = repo
            .find_by_time("s1", "2024-01-15 12:00:01", Some(PERIOD_TYPE_SCHEDULE), None)
            .unwrap();
        assert!(outside.is_empty());
    }

    #[test]
    fn overlap_query_matches_partial_windows() {
        let (_dir, repo) = setup();
        add(&repo, "p1", PERIOD_TYPE_SCENARIO, "2024-01-15 10:00:00", "2024-01-15 12:00:00");
        let hits = repo
            .find_by_time_range(
                "s1",
                "2024-01-15 11:00:00",
                "2024-01-15 14:00:00",
                Some(PERIOD_TYPE_SCENARIO),
                None,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);

        let misses = repo
            .find_by_time_range(
                "s1",
                "2024-01-15 13:00:00",
                "2024-01-15 14:00:00",
                Some(PERIOD_TYPE_SCENARIO),
                None,
            )
            .unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn business_id_is_unique() {
        let (_dir, repo) = setup();
        add(&repo, "p1", PERIOD_TYPE_EVENT, "2024-01-15 10:00:00", "2024-01-15 11:00:00");
        let result = repo.insert(
            "s1", "p1", PERIOD_TYPE_EVENT,
            "2024-01-16 10:00:00", "2024-01-16 11:00:00",
            "", "", None, None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn update_and_delete_by_business_id() {
        let (_dir, repo) = setup();
        add(&repo, "p1", PERIOD_TYPE_SCHEDULE, "2024-01-15 10:00:00", "2024-01-15 11:00:00");

        assert!(repo
            .update_by_period_id("p1", Some("new content"), None, None, Some("new title"))
            .unwrap());
        let row = repo.get_by_period_id("p1").unwrap().unwrap();
        assert_eq!(row.content, "new content");
        assert_eq!(row.title, "new title");
        assert_eq!(row.start_at, "2024-01-15 10:00:00");

        assert!(repo.delete_by_period_id("p1").unwrap());
        assert!(repo.get_by_period_id("p1").unwrap().is_none());
    }

    #[test]
    fn character_scoping_separates_rows() {
        let (_dir, repo) = setup();
        repo.insert("s1", "p1", PERIOD_TYPE_SCHEDULE, "2024-01-15 10:00:00",
                    "2024-01-15 11:00:00", "", "", Some("char-a"), None).unwrap();
        repo.insert("s1", "p2", PERIOD_TYPE_SCHEDULE, "2024-01-15 10:00:00",
                    "2024-01-15 11:00:00", "", "", None, None).unwrap();

        let scoped = repo.list_by_session("s1", Some(PERIOD_TYPE_SCHEDULE), Some("char-a")).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].period_id, "p1");

        let unscoped = repo.list_by_session("s1", Some(PERIOD_TYPE_SCHEDULE), None).unwrap();
        assert_eq!(unscoped.len(), 1);
        assert_eq!(unscoped[0].period_id, "p2");
    }
}
