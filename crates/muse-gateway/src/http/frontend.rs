use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use muse_storage::FrontendMessage;

use crate::app::AppState;
use crate::http::internal_error;

#[derive(Debug, Deserialize)]
pub struct FrontendQuery {
    pub session_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    200
}

/// GET /v1/frontend-messages
pub async fn list_frontend_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FrontendQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let messages = state
        .stores
        .frontend
        .list_by_session(&query.session_id, query.limit)
        .map_err(internal_error)?;
    Ok(Json(json!({ "messages": messages })))
}

/// POST /v1/frontend-messages — idempotent on (session_id, client_message_id).
pub async fn upsert_frontend_message(
    State(state): State<Arc<AppState>>,
    Json(message): Json<FrontendMessage>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .stores
        .frontend
        .upsert(&message)
        .map_err(internal_error)?;
    Ok(Json(json!({ "stored": message.client_message_id })))
}

/// DELETE /v1/frontend-messages?session_id=…
pub async fn delete_frontend_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FrontendQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let deleted = state
        .stores
        .frontend
        .delete_by_session(&query.session_id)
        .map_err(internal_error)?;
    Ok(Json(json!({ "deleted": deleted })))
}
