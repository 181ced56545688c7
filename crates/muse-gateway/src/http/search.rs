//! Search endpoints: forwarded to the mirror, with SQL fallbacks when the
//! daemon is offline.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use muse_memory::Memory;
use muse_search::{SearchQuery, PERIODS_INDEX};
use muse_storage::{PERIOD_TYPE_SCENARIO, PERIOD_TYPE_SCHEDULE};

use crate::app::AppState;
use crate::http::internal_error;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub session_id: String,
    #[serde(alias = "q", alias = "query")]
    pub keyword: String,
    #[serde(default)]
    pub categories: Option<Vec<i64>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub character_id: Option<String>,
}

fn default_limit() -> usize {
    100
}

/// POST /v1/search/messages
pub async fn search_messages(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let memory = Memory::new(state.stores.clone(), request.session_id.clone());
    let (messages, metadata) = memory
        .search_messages_by_keyword(
            &request.keyword,
            request.categories.as_deref(),
            request.limit,
            request.offset,
            true,
            request.character_id.as_deref(),
        )
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "messages": messages, "metadata": metadata })))
}

/// POST /v1/search/scenarios
pub async fn search_scenarios(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let hits = search_periods(&state, &request, PERIOD_TYPE_SCENARIO).await?;
    Ok(Json(json!({ "scenarios": hits })))
}

/// POST /v1/search/schedules
pub async fn search_schedules(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let hits = search_periods(&state, &request, PERIOD_TYPE_SCHEDULE).await?;
    Ok(Json(json!({ "schedules": hits })))
}

async fn search_periods(
    state: &AppState,
    request: &SearchRequest,
    period_type: &str,
) -> Result<Vec<Value>, (StatusCode, Json<Value>)> {
    if state.search.is_available() {
        let mut filter = format!(
            "session_id = '{}' AND period_type = '{}'",
            request.session_id, period_type
        );
        if let Some(character_id) = &request.character_id {
            filter.push_str(&format!(" AND character_id = '{character_id}'"));
        }
        let query = SearchQuery {
            q: request.keyword.clone(),
            filter: Some(filter),
            sort: vec!["start_at:asc".to_string()],
            limit: request.limit,
            offset: request.offset,
        };
        if let Ok(hits) = state.search.search(PERIODS_INDEX, &query).await {
            return Ok(hits);
        }
    }

    // Fallback: substring scan over the session's rows.
    let keyword = request.keyword.to_lowercase();
    let rows = state
        .stores
        .periods
        .list_by_session(
            &request.session_id,
            Some(period_type),
            request.character_id.as_deref(),
        )
        .map_err(internal_error)?;
    Ok(rows
        .into_iter()
        .filter(|row| {
            row.content.to_lowercase().contains(&keyword)
                || row.title.to_lowercase().contains(&keyword)
        })
        .skip(request.offset)
        .take(request.limit)
        .map(|row| {
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
        })
        .collect())
}
