use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::http::{internal_error, not_found};

/// GET /v1/sessions — newest activity first. `message_count` aggregates all
/// categories, system rows included.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let sessions = state.stores.sessions.list().map_err(internal_error)?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// DELETE /v1/sessions/{id}
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let deleted = state
        .stores
        .sessions
        .delete(&session_id)
        .map_err(internal_error)?;
    if !deleted {
        return Err(not_found(format!("session '{session_id}'")));
    }
    Ok(Json(json!({ "deleted": session_id })))
}
