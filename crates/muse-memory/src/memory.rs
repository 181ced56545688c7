use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use muse_clock::TimeFormat;
use muse_core::types::{
    EventEntry, Message, MessageCategory, QueryMetadata, Relation, Role, Scenario, ScheduleEntry,
};
use muse_core::{MuseError, Result};
use muse_search::{SearchError, SearchQuery, KV_INDEX, MESSAGES_INDEX, PERIODS_INDEX};
use muse_storage::{
    MessageRow, PeriodRow, PERIOD_TYPE_EVENT, PERIOD_TYPE_SCENARIO, PERIOD_TYPE_SCHEDULE,
};

use crate::docs::{kv_doc, message_doc, period_doc};
use crate::stores::Stores;

const KEY_TYPE_RELATION: &str = "relation";

fn db_err(e: muse_storage::StorageError) -> MuseError {
    match e {
        muse_storage::StorageError::InvalidInput(message) => MuseError::Validation(message),
        other => MuseError::Database(other.to_string()),
    }
}
const DEFAULT_MAX_MESSAGES: usize = 100;

#[derive(Debug, Serialize, Deserialize)]
struct RelationMeta {
    name: String,
    #[serde(default)]
    knowledge: String,
    #[serde(default)]
    progress: String,
    #[serde(default)]
    created_at: Option<String>,
}

/// Per-session, optionally character-scoped memory handle. Cheap to construct;
/// all state lives in the shared [`Stores`].
pub struct Memory {
    stores: Arc<Stores>,
    pub session_id: String,
    pub character_id: Option<String>,
    /// Recent in-process transcript window, capped at `max_messages`.
    recent: Mutex<Vec<Message>>,
    max_messages: usize,
}

impl Memory {
    pub fn new(stores: Arc<Stores>, session_id: impl Into<String>) -> Self {
        Self {
            stores,
            session_id: session_id.into(),
            character_id: None,
            recent: Mutex::new(Vec::new()),
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }

    pub fn with_character(mut self, character_id: Option<String>) -> Self {
        self.character_id = character_id;
        self
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    /// Virtual "now" for this session, readable format.
    pub fn current_time(&self) -> String {
        self.stores
            .clock
            .now_str(TimeFormat::Readable, Some(&self.session_id))
    }

    /// Snapshot of the in-process transcript window.
    pub fn recent_messages(&self) -> Vec<Message> {
        self.recent.lock().unwrap().clone()
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Append a message: persist, cap the in-process window, mirror best-effort.
    pub async fn add_message(&self, message: Message) -> Result<i64> {
        let id = self
            .stores
            .messages
            .insert(&self.session_id, &message)
            .map_err(db_err)?;

        {
            let mut recent = self.recent.lock().unwrap();
            recent.push(message.clone());
            let len = recent.len();
            if len > self.max_messages {
                recent.drain(..len - self.max_messages);
            }
        }

        let doc = message_doc(&self.session_id, &MessageRow { id, message });
        self.mirror(MESSAGES_INDEX, doc).await;
        Ok(id)
    }

    async fn mirror(&self, index: &str, doc: Value) {
        match self.stores.search.add_document(index, doc).await {
            Ok(()) => {}
            Err(SearchError::Unavailable) => debug!(index, "search mirror offline"),
            Err(e) => warn!(index, error = %e, "search mirror sync failed"),
        }
    }

    pub fn get_messages_around_time(
        &self,
        time_point: &str,
        hours: f64,
        max_messages: usize,
        categories: Option<&[i64]>,
        character_id: Option<&str>,
    ) -> Result<(Vec<Message>, QueryMetadata)> {
        let (rows, meta) = self
            .stores
            .messages
            .around_time(&self.session_id, time_point, hours, max_messages, categories, character_id)
            .map_err(db_err)?;
        Ok((rows.into_iter().map(|r| r.message).collect(), meta))
    }

    pub fn get_messages_in_range(
        &self,
        start_time: &str,
        end_time: &str,
        max_results: usize,
        categories: Option<&[i64]>,
        character_id: Option<&str>,
    ) -> Result<(Vec<Message>, QueryMetadata)> {
        let (rows, meta) = self
            .stores
            .messages
            .in_range(&self.session_id, start_time, end_time, max_results, categories, character_id)
            .map_err(db_err)?;
        Ok((rows.into_iter().map(|r| r.message).collect(), meta))
    }

    pub fn get_messages_by_date(
        &self,
        date: &str,
        max_results: usize,
        categories: Option<&[i64]>,
        character_id: Option<&str>,
    ) -> Result<(Vec<Message>, QueryMetadata)> {
        let (rows, meta) = self
            .stores
            .messages
            .by_date(&self.session_id, date, max_results, categories, character_id)
            .map_err(db_err)?;
        Ok((rows.into_iter().map(|r| r.message).collect(), meta))
    }

    /// Keyword search. With a category set, the mirror is queried once per
    /// category and the hits are deduplicated by id before sorting and paging.
    /// Falls back to SQL LIKE when the mirror is offline.
    pub async fn search_messages_by_keyword(
        &self,
        keyword: &str,
        categories: Option<&[i64]>,
        limit: usize,
        offset: usize,
        sort_desc: bool,
        character_id: Option<&str>,
    ) -> Result<(Vec<Message>, QueryMetadata)> {
        if self.stores.search.is_available() {
            match self
                .search_via_mirror(keyword, categories, limit, offset, sort_desc, character_id)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) => warn!(error = %e, "mirror keyword search failed, falling back to SQL"),
            }
        }

        let rows = self
            .stores
            .messages
            .search_by_content(&self.session_id, keyword, categories, character_id, limit, offset)
            .map_err(db_err)?;
        let mut messages: Vec<Message> = rows.into_iter().map(|r| r.message).collect();
        if !sort_desc {
            messages.reverse();
        }
        Ok((messages, QueryMetadata::default()))
    }

    async fn search_via_mirror(
        &self,
        keyword: &str,
        categories: Option<&[i64]>,
        limit: usize,
        offset: usize,
        sort_desc: bool,
        character_id: Option<&str>,
    ) -> Result<(Vec<Message>, QueryMetadata)> {
        let sort = if sort_desc {
            vec!["created_at:desc".to_string()]
        } else {
            vec!["created_at:asc".to_string()]
        };
        let category_passes: Vec<Option<i64>> = match categories {
            Some(set) if !set.is_empty() => set.iter().map(|c| Some(*c)).collect(),
            _ => vec![None],
        };

        let mut seen: HashSet<i64> = HashSet::new();
        let mut hits: Vec<(String, i64, Message)> = Vec::new();
        for category in category_passes {
            let query = SearchQuery {
                q: keyword.to_string(),
                filter: Some(muse_search::message_filter(
                    &self.session_id,
                    category,
                    character_id,
                )),
                sort: sort.clone(),
                limit: offset + limit,
                offset: 0,
            };
            let docs = self
                .stores
                .search
                .search(MESSAGES_INDEX, &query)
                .await
                .map_err(|e| MuseError::Search(e.to_string()))?;
            for doc in docs {
                let id = doc.get("id").and_then(|v| v.as_i64()).unwrap_or_default();
                if !seen.insert(id) {
                    continue;
                }
                let message = doc_to_message(&doc);
                let created_at = message.created_at.clone().unwrap_or_default();
                hits.push((created_at, id, message));
            }
        }

        if sort_desc {
            hits.sort_by(|a, b| (b.0.as_str(), b.1).cmp(&(a.0.as_str(), a.1)));
        } else {
            hits.sort_by(|a, b| (a.0.as_str(), a.1).cmp(&(b.0.as_str(), b.1)));
        }
        let total = hits.len();
        let messages: Vec<Message> = hits
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, _, m)| m)
            .collect();
        Ok((
            messages,
            QueryMetadata {
                has_more_before: false,
                has_more_after: total > offset + limit,
                time_point: None,
            },
        ))
    }

    /// Dialogue turns: assistant output persisted with category TELEGRAM or
    /// SPEAK_IN_PERSON. Triggers periodic background reflection.
    pub fn count_dialogue_messages(&self, speaker: &str, categories: Option<&[i64]>) -> Result<i64> {
        self.stores
            .messages
            .count_dialogue(&self.session_id, speaker, categories)
            .map_err(db_err)
    }

    // ── Schedules ────────────────────────────────────────────────────────────

    pub async fn add_schedule_entry(&self, mut entry: ScheduleEntry) -> Result<ScheduleEntry> {
        if entry.session_id.is_empty() {
            entry.session_id = self.session_id.clone();
        }
        if entry.entry_id.is_empty() {
            entry.entry_id = format!("entry-{}", short_id());
        }
        let id = self
            .stores
            .periods
            .insert(
                &entry.session_id,
                &entry.entry_id,
                PERIOD_TYPE_SCHEDULE,
                &entry.start_at,
                &entry.end_at,
                &entry.content,
                "",
                self.character_id.as_deref(),
                entry.created_at.as_deref(),
            )
            .map_err(db_err)?;
        self.mirror_period(id).await;
        Ok(entry)
    }

    pub fn get_schedule_entries(&self) -> Result<Vec<ScheduleEntry>> {
        Ok(self
            .list_periods(PERIOD_TYPE_SCHEDULE)?
            .iter()
            .map(row_to_schedule)
            .collect())
    }

    pub fn get_schedule_entries_at(&self, time_point: &str) -> Result<Vec<ScheduleEntry>> {
        let rows = self
            .stores
            .periods
            .find_by_time(
                &self.session_id,
                time_point,
                Some(PERIOD_TYPE_SCHEDULE),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_schedule).collect())
    }

    pub fn get_schedule_entries_in_range(
        &self,
        start_at: &str,
        end_at: &str,
    ) -> Result<Vec<ScheduleEntry>> {
        let rows = self
            .stores
            .periods
            .find_by_time_range(
                &self.session_id,
                start_at,
                end_at,
                Some(PERIOD_TYPE_SCHEDULE),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_schedule).collect())
    }

    pub fn get_schedule_entries_by_date(&self, date: &str) -> Result<Vec<ScheduleEntry>> {
        let rows = self
            .stores
            .periods
            .find_by_date(
                &self.session_id,
                date,
                Some(PERIOD_TYPE_SCHEDULE),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_schedule).collect())
    }

    pub async fn update_schedule_entry(
        &self,
        entry_id: &str,
        content: Option<&str>,
        start_at: Option<&str>,
        end_at: Option<&str>,
    ) -> Result<bool> {
        self.update_period(entry_id, content, start_at, end_at, None).await
    }

    pub async fn delete_schedule_entry(&self, entry_id: &str) -> Result<bool> {
        self.delete_period(entry_id).await
    }

    // ── Scenarios ────────────────────────────────────────────────────────────

    pub async fn add_scenario(&self, mut scenario: Scenario) -> Result<Scenario> {
        if scenario.session_id.is_empty() {
            scenario.session_id = self.session_id.clone();
        }
        let scenario_id = scenario
            .scenario_id
            .clone()
            .unwrap_or_else(|| format!("scenario-{}", short_id()));
        scenario.scenario_id = Some(scenario_id.clone());
        let id = self
            .stores
            .periods
            .insert(
                &scenario.session_id,
                &scenario_id,
                PERIOD_TYPE_SCENARIO,
                &scenario.start_at,
                &scenario.end_at,
                &scenario.content,
                &scenario.title,
                self.character_id.as_deref(),
                scenario.created_at.as_deref(),
            )
            .map_err(db_err)?;
        self.mirror_period(id).await;
        Ok(scenario)
    }

    pub fn get_scenario(&self, scenario_id: &str) -> Result<Option<Scenario>> {
        let row = self
            .stores
            .periods
            .get_by_period_id(scenario_id)
            .map_err(db_err)?;
        Ok(row
            .filter(|r| r.period_type == PERIOD_TYPE_SCENARIO && r.session_id == self.session_id)
            .map(|r| row_to_scenario(&r)))
    }

    pub fn list_scenarios(&self) -> Result<Vec<Scenario>> {
        Ok(self
            .list_periods(PERIOD_TYPE_SCENARIO)?
            .iter()
            .map(row_to_scenario)
            .collect())
    }

    pub fn get_scenarios_at(&self, time_point: &str) -> Result<Vec<Scenario>> {
        let rows = self
            .stores
            .periods
            .find_by_time(
                &self.session_id,
                time_point,
                Some(PERIOD_TYPE_SCENARIO),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_scenario).collect())
    }

    pub fn get_scenarios_in_range(&self, start_at: &str, end_at: &str) -> Result<Vec<Scenario>> {
        let rows = self
            .stores
            .periods
            .find_by_time_range(
                &self.session_id,
                start_at,
                end_at,
                Some(PERIOD_TYPE_SCENARIO),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_scenario).collect())
    }

    pub fn get_scenarios_by_date(&self, date: &str) -> Result<Vec<Scenario>> {
        let rows = self
            .stores
            .periods
            .find_by_date(
                &self.session_id,
                date,
                Some(PERIOD_TYPE_SCENARIO),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_scenario).collect())
    }

    pub async fn update_scenario(
        &self,
        scenario_id: &str,
        content: Option<&str>,
        start_at: Option<&str>,
        end_at: Option<&str>,
        title: Option<&str>,
    ) -> Result<bool> {
        self.update_period(scenario_id, content, start_at, end_at, title).await
    }

    pub async fn delete_scenario(&self, scenario_id: &str) -> Result<bool> {
        self.delete_period(scenario_id).await
    }

    // ── Events ───────────────────────────────────────────────────────────────

    pub async fn add_event(&self, mut event: EventEntry) -> Result<EventEntry> {
        if event.session_id.is_empty() {
            event.session_id = self.session_id.clone();
        }
        let event_id = event
            .event_id
            .clone()
            .unwrap_or_else(|| format!("event-{}", short_id()));
        event.event_id = Some(event_id.clone());
        let id = self
            .stores
            .periods
            .insert(
                &event.session_id,
                &event_id,
                PERIOD_TYPE_EVENT,
                &event.start_at,
                &event.end_at,
                &event.content,
                &event.title,
                self.character_id.as_deref(),
                event.created_at.as_deref(),
            )
            .map_err(db_err)?;
        self.mirror_period(id).await;
        Ok(event)
    }

    pub fn list_events(&self) -> Result<Vec<EventEntry>> {
        Ok(self
            .list_periods(PERIOD_TYPE_EVENT)?
            .iter()
            .map(row_to_event)
            .collect())
    }

    pub fn get_events_at(&self, time_point: &str) -> Result<Vec<EventEntry>> {
        let rows = self
            .stores
            .periods
            .find_by_time(
                &self.session_id,
                time_point,
                Some(PERIOD_TYPE_EVENT),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_event).collect())
    }

    pub fn get_events_in_range(&self, start_at: &str, end_at: &str) -> Result<Vec<EventEntry>> {
        let rows = self
            .stores
            .periods
            .find_by_time_range(
                &self.session_id,
                start_at,
                end_at,
                Some(PERIOD_TYPE_EVENT),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_event).collect())
    }

    pub fn get_events_by_date(&self, date: &str) -> Result<Vec<EventEntry>> {
        let rows = self
            .stores
            .periods
            .find_by_date(
                &self.session_id,
                date,
                Some(PERIOD_TYPE_EVENT),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_event).collect())
    }

    pub async fn update_event(
        &self,
        event_id: &str,
        content: Option<&str>,
        start_at: Option<&str>,
        end_at: Option<&str>,
        title: Option<&str>,
    ) -> Result<bool> {
        self.update_period(event_id, content, start_at, end_at, title).await
    }

    pub async fn delete_event(&self, event_id: &str) -> Result<bool> {
        self.delete_period(event_id).await
    }

    // ── Relations ────────────────────────────────────────────────────────────

    pub async fn add_relation(&self, mut relation: Relation) -> Result<Relation> {
        if relation.session_id.is_empty() {
            relation.session_id = self.session_id.clone();
        }
        if relation.relation_id.is_empty() {
            relation.relation_id = format!("relation-{}", short_id());
        }
        if relation.created_at.is_none() {
            relation.created_at = Some(self.current_time());
        }
        let meta = serde_json::to_string(&RelationMeta {
            name: relation.name.clone(),
            knowledge: relation.knowledge.clone(),
            progress: relation.progress.clone(),
            created_at: relation.created_at.clone(),
        })?;
        let key = relation_key(&relation.relation_id);
        let id = self
            .stores
            .kv
            .insert(
                &relation.session_id,
                &key,
                &meta,
                KEY_TYPE_RELATION,
                self.character_id.as_deref(),
                relation.created_at.as_deref(),
            )
            .map_err(db_err)?;
        self.mirror_kv(id).await;
        Ok(relation)
    }

    pub fn get_relation(&self, relation_id: &str) -> Result<Option<Relation>> {
        let entry = self
            .stores
            .kv
            .get_by_key(
                &self.session_id,
                &relation_key(relation_id),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(entry.map(|e| entry_to_relation(&self.session_id, relation_id, &e)))
    }

    pub fn list_relations(&self) -> Result<Vec<Relation>> {
        let entries = self
            .stores
            .kv
            .list_by_session(
                &self.session_id,
                Some(KEY_TYPE_RELATION),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(entries
            .iter()
            .map(|e| entry_to_relation(&self.session_id, relation_id_of(&e.key), e))
            .collect())
    }

    pub async fn update_relation(
        &self,
        relation_id: &str,
        name: Option<&str>,
        knowledge: Option<&str>,
        progress: Option<&str>,
    ) -> Result<Option<Relation>> {
        let Some(mut relation) = self.get_relation(relation_id)? else {
            return Ok(None);
        };
        if let Some(name) = name {
            relation.name = name.to_string();
        }
        if let Some(knowledge) = knowledge {
            relation.knowledge = knowledge.to_string();
        }
        if let Some(progress) = progress {
            relation.progress = progress.to_string();
        }
        let meta = serde_json::to_string(&RelationMeta {
            name: relation.name.clone(),
            knowledge: relation.knowledge.clone(),
            progress: relation.progress.clone(),
            created_at: relation.created_at.clone(),
        })?;
        let updated = self
            .stores
            .kv
            .update_metadata(
                &self.session_id,
                &relation_key(relation_id),
                &meta,
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        if !updated {
            return Ok(None);
        }
        if let Ok(Some(entry)) = self.stores.kv.get_by_key(
            &self.session_id,
            &relation_key(relation_id),
            self.character_id.as_deref(),
        ) {
            self.mirror(KV_INDEX, kv_doc(&entry)).await;
        }
        Ok(Some(relation))
    }

    pub async fn delete_relation(&self, relation_id: &str) -> Result<bool> {
        let entry = self
            .stores
            .kv
            .get_by_key(
                &self.session_id,
                &relation_key(relation_id),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        let deleted = self
            .stores
            .kv
            .delete_by_key(
                &self.session_id,
                &relation_key(relation_id),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        if deleted {
            if let Some(entry) = entry {
                if let Err(e) = self
                    .stores
                    .search
                    .delete_document(KV_INDEX, &entry.id.to_string())
                    .await
                {
                    debug!(error = %e, "kv mirror delete failed");
                }
            }
        }
        Ok(deleted)
    }

    pub fn search_relations(&self, keyword: &str) -> Result<Vec<Relation>> {
        let entries = self
            .stores
            .kv
            .search_by_keyword(
                &self.session_id,
                keyword,
                Some(KEY_TYPE_RELATION),
                self.character_id.as_deref(),
            )
            .map_err(db_err)?;
        Ok(entries
            .iter()
            .map(|e| entry_to_relation(&self.session_id, relation_id_of(&e.key), e))
            .collect())
    }

    // ── Shared period plumbing ───────────────────────────────────────────────

    fn list_periods(&self, period_type: &str) -> Result<Vec<PeriodRow>> {
        self.stores
            .periods
            .list_by_session(&self.session_id, Some(period_type), self.character_id.as_deref())
            .map_err(db_err)
    }

    async fn update_period(
        &self,
        period_id: &str,
        content: Option<&str>,
        start_at: Option<&str>,
        end_at: Option<&str>,
        title: Option<&str>,
    ) -> Result<bool> {
        let updated = self
            .stores
            .periods
            .update_by_period_id(period_id, content, start_at, end_at, title)
            .map_err(db_err)?;
        if updated {
            if let Ok(Some(row)) = self.stores.periods.get_by_period_id(period_id) {
                self.mirror(PERIODS_INDEX, period_doc(&row)).await;
            }
        }
        Ok(updated)
    }

    async fn delete_period(&self, period_id: &str) -> Result<bool> {
        let row = self
            .stores
            .periods
            .get_by_period_id(period_id)
            .map_err(db_err)?;
        let deleted = self
            .stores
            .periods
            .delete_by_period_id(period_id)
            .map_err(db_err)?;
        if deleted {
            if let Some(row) = row {
                if let Err(e) = self
                    .stores
                    .search
                    .delete_document(PERIODS_INDEX, &row.id.to_string())
                    .await
                {
                    debug!(error = %e, "period mirror delete failed");
                }
            }
        }
        Ok(deleted)
    }

    async fn mirror_period(&self, db_id: i64) {
        if let Ok(Some(row)) = self.stores.periods.get_by_id(db_id) {
            self.mirror(PERIODS_INDEX, period_doc(&row)).await;
        }
    }

    async fn mirror_kv(&self, db_id: i64) {
        if let Ok(Some(entry)) = self.stores.kv.get_by_id(db_id) {
            self.mirror(KV_INDEX, kv_doc(&entry)).await;
        }
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn relation_key(relation_id: &str) -> String {
    format!("relation:{relation_id}")
}

fn relation_id_of(key: &str) -> &str {
    key.strip_prefix("relation:").unwrap_or(key)
}

fn entry_to_relation(session_id: &str, relation_id: &str, entry: &muse_storage::KvEntry) -> Relation {
    let meta: RelationMeta = serde_json::from_str(&entry.metadata).unwrap_or(RelationMeta {
        name: String::new(),
        knowledge: String::new(),
        progress: String::new(),
        created_at: None,
    });
    Relation {
        relation_id: relation_id.to_string(),
        session_id: session_id.to_string(),
        name: meta.name,
        knowledge: meta.knowledge,
        progress: meta.progress,
        created_at: meta.created_at.or_else(|| entry.created_at.clone()),
    }
}

fn row_to_schedule(row: &PeriodRow) -> ScheduleEntry {
    ScheduleEntry {
        entry_id: row.period_id.clone(),
        session_id: row.session_id.clone(),
        start_at: row.start_at.clone(),
        end_at: row.end_at.clone(),
        content: row.content.clone(),
        created_at: row.created_at.clone(),
    }
}

fn row_to_scenario(row: &PeriodRow) -> Scenario {
    Scenario {
        session_id: row.session_id.clone(),
        scenario_id: Some(row.period_id.clone()),
        start_at: row.start_at.clone(),
        end_at: row.end_at.clone(),
        content: row.content.clone(),
        title: row.title.clone(),
        created_at: row.created_at.clone(),
    }
}

fn row_to_event(row: &PeriodRow) -> EventEntry {
    EventEntry {
        session_id: row.session_id.clone(),
        event_id: Some(row.period_id.clone()),
        start_at: row.start_at.clone(),
        end_at: row.end_at.clone(),
        content: row.content.clone(),
        title: row.title.clone(),
        created_at: row.created_at.clone(),
    }
}

fn doc_to_message(doc: &Value) -> Message {
    let text = |key: &str| {
        doc.get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let character_ids: Option<Vec<String>> = doc
        .get("character_ids")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .filter(|v: &Vec<String>| !v.is_empty());
    Message {
        role: doc
            .get("role")
            .and_then(|v| v.as_str())
            .and_then(Role::parse)
            .unwrap_or(Role::User),
        content: text("content"),
        tool_calls: None,
        tool_name: text("tool_name"),
        speaker: text("speaker"),
        tool_call_id: text("tool_call_id"),
        created_at: text("created_at"),
        category: MessageCategory::from_i64(
            doc.get("category").and_then(|v| v.as_i64()).unwrap_or(0),
        ),
        visible_for_characters: character_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muse_clock::TimeProvider;
    use muse_core::config::MeilisearchSettings;
    use muse_search::SearchService;
    use muse_storage::DatabaseManager;

    fn setup() -> (tempfile::TempDir, Memory) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
        let clock = Arc::new(TimeProvider::new());
        let search = Arc::new(SearchService::new(&MeilisearchSettings::default()));
        let stores = Stores::new(db, clock, search);
        (dir, Memory::new(stores, "s1"))
    }

    #[tokio::test]
    async fn add_message_persists_and_caps_window() {
        let (_dir, memory) = setup();
        let id = memory
            .add_message(Message::user("hello", "2024-01-15 14:00:00"))
            .await
            .unwrap();
        assert!(id > 0);
        assert_eq!(memory.recent_messages().len(), 1);

        let (messages, _) = memory
            .get_messages_around_time("2024-01-15 14:00:00", 1.0, 10, None, None)
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn schedule_crud_roundtrip() {
        let (_dir, memory) = setup();
        let entry = memory
            .add_schedule_entry(ScheduleEntry {
                entry_id: String::new(),
                session_id: String::new(),
                start_at: "2024-01-15 09:00:00".to_string(),
                end_at: "2024-01-15 10:00:00".to_string(),
                content: "standup".to_string(),
                created_at: None,
            })
            .await
            .unwrap();
        assert!(entry.entry_id.starts_with("entry-"));

        let at = memory.get_schedule_entries_at("2024-01-15 09:30:00").unwrap();
        assert_eq!(at.len(), 1);

        assert!(memory
            .update_schedule_entry(&entry.entry_id, Some("standup (moved)"), None, None)
            .await
            .unwrap());
        let all = memory.get_schedule_entries().unwrap();
        assert_eq!(all[0].content, "standup (moved)");

        assert!(memory.delete_schedule_entry(&entry.entry_id).await.unwrap());
        assert!(memory.get_schedule_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn relation_crud_roundtrip() {
        let (_dir, memory) = setup();
        let relation = memory
            .add_relation(Relation {
                relation_id: "r1".to_string(),
                session_id: String::new(),
                name: "Ann".to_string(),
                knowledge: "likes tea".to_string(),
                progress: "friends".to_string(),
                created_at: None,
            })
            .await
            .unwrap();
        assert_eq!(relation.relation_id, "r1");

        let loaded = memory.get_relation("r1").unwrap().unwrap();
        assert_eq!(loaded.name, "Ann");

        let updated = memory
            .update_relation("r1", None, Some("likes green tea"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.knowledge, "likes green tea");

        let hits = memory.search_relations("green").unwrap();
        assert_eq!(hits.len(), 1);

        assert!(memory.delete_relation("r1").await.unwrap());
        assert!(memory.get_relation("r1").unwrap().is_none());
    }

    #[tokio::test]
    async fn keyword_search_falls_back_to_sql() {
        let (_dir, memory) = setup();
        memory
            .add_message(Message::user("the quick brown fox", "2024-01-15 14:00:00"))
            .await
            .unwrap();
        memory
            .add_message(Message::user("unrelated", "2024-01-15 14:01:00"))
            .await
            .unwrap();

        let (hits, _) = memory
            .search_messages_by_keyword("quick", None, 10, 0, true, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content.as_deref(), Some("the quick brown fox"));
    }

    #[tokio::test]
    async fn scenario_visibility_is_scoped_by_character() {
        let (_dir, memory) = setup();
        let scoped = Memory::new(memory.stores().clone(), "s1")
            .with_character(Some("char-a".to_string()));
        scoped
            .add_scenario(Scenario {
                session_id: String::new(),
                scenario_id: None,
                start_at: "2024-01-15 09:00:00".to_string(),
                end_at: "2024-01-15 10:00:00".to_string(),
                content: "secret scene".to_string(),
                title: "Scene".to_string(),
                created_at: None,
            })
            .await
            .unwrap();

        assert_eq!(scoped.list_scenarios().unwrap().len(), 1);
        assert!(memory.list_scenarios().unwrap().is_empty());
    }
}
