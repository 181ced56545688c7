use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection};
use tracing::warn;

use muse_clock::{TimeFormat, TimeProvider};
use muse_core::types::{Message, MessageCategory, QueryMetadata, Role, ToolCall, TIME_FORMAT};

use crate::error::{Result, StorageError};
use crate::manager::DatabaseManager;

const SELECT_COLUMNS: &str =
    "id, role, content, tool_calls, tool_name, speaker, tool_call_id, created_at, category";

/// A persisted message together with its row id.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub message: Message,
}

/// Message rows plus their character-visibility rows. Visibility rows are
/// written in the same transaction as the parent message.
pub struct MessageRepository {
    db: Arc<DatabaseManager>,
    clock: Arc<TimeProvider>,
}

impl MessageRepository {
    pub fn new(db: Arc<DatabaseManager>, clock: Arc<TimeProvider>) -> Self {
        Self { db, clock }
    }

    /// Insert a message and its visibility rows atomically, bumping the
    /// owning session's virtual timestamp. Returns the new row id.
    pub fn insert(&self, session_id: &str, message: &Message) -> Result<i64> {
        let created_at = message
            .created_at
            .clone()
            .unwrap_or_else(|| self.clock.now_str(TimeFormat::Readable, Some(session_id)));
        let virtual_now = self.clock.now_str(TimeFormat::Readable, Some(session_id));
        let real_now = self.clock.real_now_str(TimeFormat::Readable);
        let tool_calls_json = serialize_tool_calls(message.tool_calls.as_deref())?;

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO sessions (id, name, created_at, updated_at, real_updated_at)
                 VALUES (?1, ?2, ?3, ?3, ?4)",
                params![session_id, format!("Session {session_id}"), virtual_now, real_now],
            )?;
            tx.execute(
                "INSERT INTO messages (session_id, role, content, tool_calls, tool_name,
                                       speaker, tool_call_id, created_at, category, real_updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    session_id,
                    message.role.as_str(),
                    message.content,
                    tool_calls_json,
                    message.tool_name,
                    message.speaker,
                    message.tool_call_id,
                    created_at,
                    message.category.as_i64(),
                    real_now,
                ],
            )?;
            let message_id = tx.last_insert_rowid();
            if let Some(characters) = &message.visible_for_characters {
                for character_id in characters {
                    tx.execute(
                        "INSERT OR IGNORE INTO message_characters (message_id, character_id)
                         VALUES (?1, ?2)",
                        params![message_id, character_id],
                    )?;
                }
            }
            tx.execute(
                "UPDATE sessions SET updated_at = ?1, real_updated_at = ?2 WHERE id = ?3",
                params![virtual_now, real_now, session_id],
            )?;
            tx.commit()?;
            Ok(message_id)
        })
    }

    /// All messages for a session in chronological order.
    pub fn get_by_session(&self, session_id: &str) -> Result<Vec<MessageRow>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM messages
                 WHERE session_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(params![session_id], row_to_message)?
                .collect::<rusqlite::Result<Vec<MessageRow>>>()?;
            attach_visibility(conn, rows)
        })
    }

    /// Every message row in the working database; feeds the full reindex.
    pub fn all_rows(&self) -> Result<Vec<(String, MessageRow)>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT session_id, {SELECT_COLUMNS} FROM messages ORDER BY id ASC"
            ))?;
            let rows = stmt
                .query_map([], |row| {
                    let session_id: String = row.get(0)?;
                    let role_str: String = row.get(2)?;
                    let tool_calls_json: Option<String> = row.get(4)?;
                    Ok((
                        session_id,
                        MessageRow {
                            id: row.get(1)?,
                            message: Message {
                                role: Role::parse(&role_str).unwrap_or(Role::User),
                                content: row.get(3)?,
                                tool_calls: deserialize_tool_calls(tool_calls_json.as_deref()),
                                tool_name: row.get(5)?,
                                speaker: row.get(6)?,
                                tool_call_id: row.get(7)?,
                                created_at: row.get(8)?,
                                category: MessageCategory::from_i64(row.get(9)?),
                                visible_for_characters: None,
                            },
                        },
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let with_visibility = attach_visibility(
                conn,
                rows.iter().map(|(_, r)| r.clone()).collect(),
            )?;
            Ok(rows
                .into_iter()
                .zip(with_visibility)
                .map(|((session_id, _), row)| (session_id, row))
                .collect())
        })
    }

    /// Visibility rows cascade with the messages.
    pub fn delete_by_session(&self, session_id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
            Ok(())
        })
    }

    /// Proximity query around `time_point` with half-range `hours` and cap
    /// `max_messages`. Scans up to `max_messages + 1` rows in each direction,
    /// keeps the rows closest in time (row id breaks ties), and returns them
    /// chronologically together with has-more metadata.
    pub fn around_time(
        &self,
        session_id: &str,
        time_point: &str,
        hours: f64,
        max_messages: usize,
        categories: Option<&[i64]>,
        character_id: Option<&str>,
    ) -> Result<(Vec<MessageRow>, QueryMetadata)> {
        let time_point_dt = parse_time(time_point)?;
        let half_range = Duration::milliseconds((hours.abs() * 3_600_000.0) as i64);
        let lower = (time_point_dt - half_range).format(TIME_FORMAT).to_string();
        let upper = (time_point_dt + half_range).format(TIME_FORMAT).to_string();
        let limit = max_messages + 1;

        let (filter_sql, filter_params) = build_filters(categories, character_id, 4);

        let (before_all, after_all) = self.db.with_conn(|conn| {
            let before_sql = format!(
                "SELECT {SELECT_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND created_at >= ?2 AND created_at < ?3 {filter_sql}
                 ORDER BY created_at DESC LIMIT ?{limit_idx}",
                limit_idx = 4 + filter_params.len()
            );
            let after_sql = format!(
                "SELECT {SELECT_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND created_at >= ?2 AND created_at <= ?3 {filter_sql}
                 ORDER BY created_at ASC LIMIT ?{limit_idx}",
                limit_idx = 4 + filter_params.len()
            );

            let mut before_params: Vec<&dyn ToSql> = vec![&session_id, &lower, &time_point];
            before_params.extend(filter_params.iter().map(|p| &**p));
            before_params.push(&limit);
            let mut stmt = conn.prepare(&before_sql)?;
            let before = stmt
                .query_map(params_from_iter(before_params), row_to_message)?
                .collect::<rusqlite::Result<Vec<MessageRow>>>()?;

            let mut after_params: Vec<&dyn ToSql> = vec![&session_id, &time_point, &upper];
            after_params.extend(filter_params.iter().map(|p| &**p));
            after_params.push(&limit);
            let mut stmt = conn.prepare(&after_sql)?;
            let after = stmt
                .query_map(params_from_iter(after_params), row_to_message)?
                .collect::<rusqlite::Result<Vec<MessageRow>>>()?;

            Ok((before, after))
        })?;

        // Merge the truncated windows and keep the rows closest to the pivot.
        let mut merged: Vec<(i64, i64, bool, MessageRow)> = Vec::new();
        for row in before_all
            .iter()
            .take(max_messages)
            .chain(after_all.iter().take(max_messages))
        {
            let (distance_ms, is_before) = match row.message.created_at.as_deref().and_then(|s| parse_time(s).ok()) {
                Some(dt) => (
                    (dt - time_point_dt).num_milliseconds().abs(),
                    dt < time_point_dt,
                ),
                None => (i64::MAX, false),
            };
            merged.push((distance_ms, row.id, is_before, row.clone()));
        }
        merged.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        merged.truncate(max_messages);

        let before_kept = merged.iter().filter(|(_, _, is_before, _)| *is_before).count();
        let after_kept = merged.len() - before_kept;

        let mut result: Vec<MessageRow> = merged.into_iter().map(|(_, _, _, row)| row).collect();
        result.sort_by(|a, b| {
            (a.message.created_at.as_deref(), a.id).cmp(&(b.message.created_at.as_deref(), b.id))
        });

        let metadata = QueryMetadata {
            has_more_before: before_kept < before_all.len(),
            has_more_after: after_kept < after_all.len(),
            time_point: Some(time_point.to_string()),
        };

        let result = self.db.with_conn(|conn| attach_visibility(conn, result.clone()))?;
        Ok((result, metadata))
    }

    /// Messages with `created_at` in `[start_time, end_time]`, ascending. The
    /// `max_results + 1` probe drives `has_more_after`.
    pub fn in_range(
        &self,
        session_id: &str,
        start_time: &str,
        end_time: &str,
        max_results: usize,
        categories: Option<&[i64]>,
        character_id: Option<&str>,
    ) -> Result<(Vec<MessageRow>, QueryMetadata)> {
        let limit = max_results + 1;
        let (filter_sql, filter_params) = build_filters(categories, character_id, 4);

        let rows = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND created_at >= ?2 AND created_at <= ?3 {filter_sql}
                 ORDER BY created_at ASC LIMIT ?{limit_idx}",
                limit_idx = 4 + filter_params.len()
            );
            let mut query_params: Vec<&dyn ToSql> = vec![&session_id, &start_time, &end_time];
            query_params.extend(filter_params.iter().map(|p| &**p));
            query_params.push(&limit);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(query_params), row_to_message)?
                .collect::<rusqlite::Result<Vec<MessageRow>>>()?;
            attach_visibility(conn, rows)
        })?;

        let has_more_after = rows.len() > max_results;
        let mut rows = rows;
        rows.truncate(max_results);
        Ok((
            rows,
            QueryMetadata {
                has_more_before: false,
                has_more_after,
                time_point: None,
            },
        ))
    }

    /// All messages whose `created_at` falls on the given calendar date.
    pub fn by_date(
        &self,
        session_id: &str,
        date: &str,
        max_results: usize,
        categories: Option<&[i64]>,
        character_id: Option<&str>,
    ) -> Result<(Vec<MessageRow>, QueryMetadata)> {
        let date_only = if date.len() > 10 { &date[..10] } else { date };
        let limit = max_results + 1;
        let (filter_sql, filter_params) = build_filters(categories, character_id, 3);

        let rows = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND date(created_at) = date(?2) {filter_sql}
                 ORDER BY created_at ASC LIMIT ?{limit_idx}",
                limit_idx = 3 + filter_params.len()
            );
            let mut query_params: Vec<&dyn ToSql> = vec![&session_id, &date_only];
            query_params.extend(filter_params.iter().map(|p| &**p));
            query_params.push(&limit);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(query_params), row_to_message)?
                .collect::<rusqlite::Result<Vec<MessageRow>>>()?;
            attach_visibility(conn, rows)
        })?;

        let has_more_after = rows.len() > max_results;
        let mut rows = rows;
        rows.truncate(max_results);
        Ok((
            rows,
            QueryMetadata {
                has_more_before: false,
                has_more_after,
                time_point: None,
            },
        ))
    }

    /// LIKE-based fallback search used when the mirror is unavailable.
    pub fn search_by_content(
        &self,
        session_id: &str,
        keyword: &str,
        categories: Option<&[i64]>,
        character_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRow>> {
        let pattern = format!("%{keyword}%");
        let (filter_sql, filter_params) = build_filters(categories, character_id, 3);
        let limit = limit as i64;
        let offset = offset as i64;

        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND content LIKE ?2 {filter_sql}
                 ORDER BY created_at DESC
                 LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
                limit_idx = 3 + filter_params.len(),
                offset_idx = 4 + filter_params.len()
            );
            let mut query_params: Vec<&dyn ToSql> = vec![&session_id, &pattern];
            query_params.extend(filter_params.iter().map(|p| &**p));
            query_params.push(&limit);
            query_params.push(&offset);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(query_params), row_to_message)?
                .collect::<rusqlite::Result<Vec<MessageRow>>>()?;
            attach_visibility(conn, rows)
        })
    }

    /// `COUNT(*)` over `(speaker, category ∈ cats)`; drives the background
    /// reflection cadence.
    pub fn count_dialogue(
        &self,
        session_id: &str,
        speaker: &str,
        categories: Option<&[i64]>,
    ) -> Result<i64> {
        let categories = categories
            .map(|c| c.to_vec())
            .unwrap_or_else(MessageCategory::dialogue_categories);
        if categories.is_empty() {
            return Ok(0);
        }
        let placeholders = (0..categories.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(",");

        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM messages
                 WHERE session_id = ?1 AND speaker = ?2 AND category IN ({placeholders})"
            );
            let mut query_params: Vec<&dyn ToSql> = vec![&session_id, &speaker];
            for c in &categories {
                query_params.push(c);
            }
            conn.query_row(&sql, params_from_iter(query_params), |row| row.get(0))
        })
    }
}

/// Category and character-visibility predicates shared by the time queries.
/// The visibility predicate admits rows with zero visibility entries (visible
/// to all) or an entry matching the requested character. `start_index` is the
/// first free positional placeholder after the caller's own parameters.
fn build_filters(
    categories: Option<&[i64]>,
    character_id: Option<&str>,
    start_index: usize,
) -> (String, Vec<Box<dyn ToSql>>) {
    let mut sql = String::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();
    let mut index = start_index;

    if let Some(categories) = categories {
        if !categories.is_empty() {
            let placeholders = categories
                .iter()
                .map(|_| {
                    let p = format!("?{index}");
                    index += 1;
                    p
                })
                .collect::<Vec<_>>()
                .join(",");
            sql.push_str(&format!(" AND category IN ({placeholders})"));
            for c in categories {
                params.push(Box::new(*c));
            }
        }
    }

    if let Some(character_id) = character_id {
        sql.push_str(&format!(
            " AND (NOT EXISTS (SELECT 1 FROM message_characters WHERE message_id = messages.id)
               OR EXISTS (SELECT 1 FROM message_characters
                          WHERE message_id = messages.id AND character_id = ?{index}))"
        ));
        params.push(Box::new(character_id.to_string()));
    }

    (sql, params)
}

fn attach_visibility(conn: &Connection, mut rows: Vec<MessageRow>) -> rusqlite::Result<Vec<MessageRow>> {
    if rows.is_empty() {
        return Ok(rows);
    }
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT message_id, character_id FROM message_characters WHERE message_id IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut map: HashMap<i64, Vec<String>> = HashMap::new();
    let pairs = stmt.query_map(params_from_iter(ids.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    for pair in pairs {
        let (message_id, character_id) = pair?;
        map.entry(message_id).or_default().push(character_id);
    }
    for row in &mut rows {
        row.message.visible_for_characters = map.remove(&row.id);
    }
    Ok(rows)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let role_str: String = row.get(1)?;
    let tool_calls_json: Option<String> = row.get(3)?;
    Ok(MessageRow {
        id: row.get(0)?,
        message: Message {
            role: Role::parse(&role_str).unwrap_or(Role::User),
            content: row.get(2)?,
            tool_calls: deserialize_tool_calls(tool_calls_json.as_deref()),
            tool_name: row.get(4)?,
            speaker: row.get(5)?,
            tool_call_id: row.get(6)?,
            created_at: row.get(7)?,
            category: MessageCategory::from_i64(row.get(8)?),
            visible_for_characters: None,
        },
    })
}

fn serialize_tool_calls(calls: Option<&[ToolCall]>) -> Result<Option<String>> {
    match calls {
        Some(calls) if !calls.is_empty() => Ok(Some(serde_json::to_string(calls)?)),
        _ => Ok(None),
    }
}

fn deserialize_tool_calls(json: Option<&str>) -> Option<Vec<ToolCall>> {
    let json = json?;
    match serde_json::from_str(json) {
        Ok(calls) => Some(calls),
        Err(e) => {
            warn!(error = %e, "failed to parse stored tool_calls");
            None
        }
    }
}

fn parse_time(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| {
            StorageError::InvalidInput(format!(
                "invalid time '{value}', expected 'YYYY-MM-DD HH:MM:SS'"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, MessageRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
        let clock = Arc::new(TimeProvider::new());
        (dir, MessageRepository::new(db, clock))
    }

    fn msg_at(content: &str, created_at: &str) -> Message {
        Message::user(content, created_at)
    }

    #[test]
    fn insert_and_load_roundtrip() {
        let (_dir, repo) = setup();
        let mut msg = msg_at("hello", "2024-01-15 14:30:00");
        msg.visible_for_characters = Some(vec!["char-a".to_string()]);
        let id = repo.insert("s1", &msg).unwrap();
        assert!(id > 0);

        let rows = repo.get_by_session("s1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message.content.as_deref(), Some("hello"));
        assert_eq!(
            rows[0].message.visible_for_characters,
            Some(vec!["char-a".to_string()])
        );
    }

    #[test]
    fn around_time_orders_chronologically_and_caps() {
        let (_dir, repo) = setup();
        for (content, at) in [
            ("a", "2024-01-15 13:00:00"),
            ("b", "2024-01-15 13:50:00"),
            ("c", "2024-01-15 14:10:00"),
            ("d", "2024-01-15 15:30:00"),
        ] {
            repo.insert("s1", &msg_at(content, at)).unwrap();
        }

        let (rows, meta) = repo
            .around_time("s1", "2024-01-15 14:00:00", 1.0, 2, None, None)
            .unwrap();
        // Closest two within ±1h: "b" (10 min) and "c" (10 min); chronological order.
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message.content.as_deref(), Some("b"));
        assert_eq!(rows[1].message.content.as_deref(), Some("c"));
        assert_eq!(meta.time_point.as_deref(), Some("2024-01-15 14:00:00"));
        // "a" was inside the window and probed but not kept.
        assert!(meta.has_more_before);
        assert!(!meta.has_more_after);
    }

    #[test]
    fn around_time_category_filter() {
        let (_dir, repo) = setup();
        repo.insert(
            "s1",
            &msg_at("tg", "2024-01-15 14:00:00").with_category(MessageCategory::Telegram),
        )
        .unwrap();
        repo.insert(
            "s1",
            &msg_at("sp", "2024-01-15 14:01:00").with_category(MessageCategory::SpeakInPerson),
        )
        .unwrap();

        let (rows, _) = repo
            .around_time(
                "s1",
                "2024-01-15 14:00:30",
                1.0,
                10,
                Some(&[MessageCategory::Telegram.as_i64()]),
                None,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message.content.as_deref(), Some("tg"));
    }

    #[test]
    fn visibility_filter_admits_unscoped_and_matching_rows() {
        let (_dir, repo) = setup();
        repo.insert("s1", &msg_at("for-all", "2024-01-15 14:00:00")).unwrap();
        repo.insert(
            "s1",
            &msg_at("for-a", "2024-01-15 14:01:00")
                .with_visibility(Some(vec!["char-a".to_string()])),
        )
        .unwrap();
        repo.insert(
            "s1",
            &msg_at("for-b", "2024-01-15 14:02:00")
                .with_visibility(Some(vec!["char-b".to_string()])),
        )
        .unwrap();

        let (rows, _) = repo
            .around_time("s1", "2024-01-15 14:01:00", 1.0, 10, None, Some("char-a"))
            .unwrap();
        let contents: Vec<_> = rows
            .iter()
            .map(|r| r.message.content.as_deref().unwrap())
            .collect();
        assert_eq!(contents, vec!["for-all", "for-a"]);
    }

    #[test]
    fn in_range_probe_drives_has_more_after() {
        let (_dir, repo) = setup();
        for i in 0..4 {
            repo.insert("s1", &msg_at(&format!("m{i}"), &format!("2024-01-15 14:0{i}:00")))
                .unwrap();
        }
        let (rows, meta) = repo
            .in_range("s1", "2024-01-15 14:00:00", "2024-01-15 15:00:00", 3, None, None)
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(meta.has_more_after);

        let (rows, meta) = repo
            .in_range("s1", "2024-01-15 14:00:00", "2024-01-15 15:00:00", 10, None, None)
            .unwrap();
        assert_eq!(rows.len(), 4);
        assert!(!meta.has_more_after);
    }

    #[test]
    fn by_date_accepts_full_timestamp() {
        let (_dir, repo) = setup();
        repo.insert("s1", &msg_at("today", "2024-01-15 09:00:00")).unwrap();
        repo.insert("s1", &msg_at("other", "2024-01-16 09:00:00")).unwrap();
        let (rows, _) = repo
            .by_date("s1", "2024-01-15 23:59:59", 10, None, None)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message.content.as_deref(), Some("today"));
    }

    #[test]
    fn count_dialogue_matches_speaker_and_categories() {
        let (_dir, repo) = setup();
        for category in [
            MessageCategory::Telegram,
            MessageCategory::SpeakInPerson,
            MessageCategory::Thought,
        ] {
            repo.insert(
                "s1",
                &Message::assistant("hi", "2024-01-15 14:00:00")
                    .with_speaker("Lina")
                    .with_category(category),
            )
            .unwrap();
        }
        repo.insert(
            "s1",
            &Message::assistant("hi", "2024-01-15 14:00:00")
                .with_speaker("other")
                .with_category(MessageCategory::Telegram),
        )
        .unwrap();

        assert_eq!(repo.count_dialogue("s1", "Lina", None).unwrap(), 2);
        assert_eq!(
            repo.count_dialogue("s1", "Lina", Some(&[MessageCategory::Thought.as_i64()]))
                .unwrap(),
            1
        );
    }
}
