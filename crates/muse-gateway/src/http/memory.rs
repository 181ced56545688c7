//! Read endpoints over the memory facade, plus relation CRUD.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use muse_core::types::Relation;
use muse_memory::Memory;

use crate::app::AppState;
use crate::http::{bad_request, internal_error, muse_error, not_found};

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub session_id: String,
    #[serde(default)]
    pub time_point: Option<String>,
    #[serde(default = "default_hours")]
    pub hours: f64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub character_id: Option<String>,
}

fn default_hours() -> f64 {
    1.0
}

fn default_limit() -> usize {
    100
}

fn memory_for(state: &AppState, session_id: &str, character_id: Option<String>) -> Memory {
    Memory::new(state.stores.clone(), session_id).with_character(character_id)
}

/// GET /v1/memory/messages — around a time point, in a range, or on a date.
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let memory = memory_for(&state, &query.session_id, query.character_id.clone());
    let character_id = query.character_id.as_deref();

    let (messages, metadata) = if let Some(time_point) = &query.time_point {
        memory.get_messages_around_time(time_point, query.hours, query.limit, None, character_id)
    } else if let (Some(start), Some(end)) = (&query.start_time, &query.end_time) {
        memory.get_messages_in_range(start, end, query.limit, None, character_id)
    } else if let Some(date) = &query.date {
        memory.get_messages_by_date(date, query.limit, None, character_id)
    } else {
        return Err(bad_request(
            "provide 'time_point', 'start_time'+'end_time', or 'date'",
        ));
    }
    .map_err(muse_error)?;

    Ok(Json(json!({ "messages": messages, "metadata": metadata })))
}

#[derive(Debug, Deserialize)]
pub struct PeriodsQuery {
    pub session_id: String,
    #[serde(default)]
    pub time_point: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub character_id: Option<String>,
}

/// GET /v1/memory/schedules
pub async fn get_schedules(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PeriodsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let memory = memory_for(&state, &query.session_id, query.character_id.clone());
    let entries = if let Some(time_point) = &query.time_point {
        memory.get_schedule_entries_at(time_point)
    } else if let Some(date) = &query.date {
        memory.get_schedule_entries_by_date(date)
    } else {
        memory.get_schedule_entries()
    }
    .map_err(muse_error)?;
    Ok(Json(json!({ "schedules": entries })))
}

/// GET /v1/memory/scenarios
pub async fn get_scenarios(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PeriodsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let memory = memory_for(&state, &query.session_id, query.character_id.clone());
    let scenarios = if let Some(time_point) = &query.time_point {
        memory.get_scenarios_at(time_point)
    } else if let Some(date) = &query.date {
        memory.get_scenarios_by_date(date)
    } else {
        memory.list_scenarios()
    }
    .map_err(muse_error)?;
    Ok(Json(json!({ "scenarios": scenarios })))
}

/// GET /v1/memory/events
pub async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PeriodsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let memory = memory_for(&state, &query.session_id, query.character_id.clone());
    let events = if let Some(time_point) = &query.time_point {
        memory.get_events_at(time_point)
    } else if let Some(date) = &query.date {
        memory.get_events_by_date(date)
    } else {
        memory.list_events()
    }
    .map_err(muse_error)?;
    Ok(Json(json!({ "events": events })))
}

#[derive(Debug, Deserialize)]
pub struct RelationQuery {
    pub session_id: String,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub character_id: Option<String>,
}

/// GET /v1/relations
pub async fn list_relations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelationQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let memory = memory_for(&state, &query.session_id, query.character_id.clone());
    let relations = match &query.keyword {
        Some(keyword) => memory.search_relations(keyword),
        None => memory.list_relations(),
    }
    .map_err(internal_error)?;
    Ok(Json(json!({ "relations": relations })))
}

#[derive(Debug, Deserialize)]
pub struct CreateRelationRequest {
    pub session_id: String,
    #[serde(default)]
    pub relation_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub knowledge: String,
    #[serde(default)]
    pub progress: String,
    #[serde(default)]
    pub character_id: Option<String>,
}

/// POST /v1/relations
pub async fn create_relation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRelationRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let memory = memory_for(&state, &request.session_id, request.character_id.clone());
    let relation = memory
        .add_relation(Relation {
            relation_id: request.relation_id.unwrap_or_default(),
            session_id: request.session_id.clone(),
            name: request.name,
            knowledge: request.knowledge,
            progress: request.progress,
            created_at: None,
        })
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "relation": relation })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRelationRequest {
    pub session_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub knowledge: Option<String>,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub character_id: Option<String>,
}

/// PUT /v1/relations/{relation_id}
pub async fn update_relation(
    State(state): State<Arc<AppState>>,
    Path(relation_id): Path<String>,
    Json(request): Json<UpdateRelationRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let memory = memory_for(&state, &request.session_id, request.character_id.clone());
    let updated = memory
        .update_relation(
            &relation_id,
            request.name.as_deref(),
            request.knowledge.as_deref(),
            request.progress.as_deref(),
        )
        .await
        .map_err(internal_error)?;
    match updated {
        Some(relation) => Ok(Json(json!({ "relation": relation }))),
        None => Err(not_found(format!("relation '{relation_id}'"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteRelationQuery {
    pub session_id: String,
    #[serde(default)]
    pub character_id: Option<String>,
}

/// DELETE /v1/relations/{relation_id}
pub async fn delete_relation(
    State(state): State<Arc<AppState>>,
    Path(relation_id): Path<String>,
    Query(query): Query<DeleteRelationQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let memory = memory_for(&state, &query.session_id, query.character_id.clone());
    let deleted = memory
        .delete_relation(&relation_id)
        .await
        .map_err(internal_error)?;
    if !deleted {
        return Err(not_found(format!("relation '{relation_id}'")));
    }
    Ok(Json(json!({ "deleted": relation_id })))
}
