use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use muse_storage::CharacterRecord;

use crate::app::AppState;
use crate::http::{internal_error, not_found};

/// GET /v1/characters
pub async fn list_characters(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let characters = state.characters.list().map_err(internal_error)?;
    Ok(Json(json!({ "characters": characters })))
}

/// POST /v1/characters
pub async fn upsert_character(
    State(state): State<Arc<AppState>>,
    Json(record): Json<CharacterRecord>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.characters.upsert(&record).map_err(internal_error)?;
    Ok(Json(json!({ "character": record })))
}

/// GET /v1/characters/{character_id}
pub async fn get_character(
    State(state): State<Arc<AppState>>,
    Path(character_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.characters.get(&character_id).map_err(internal_error)? {
        Some(character) => Ok(Json(json!({ "character": character }))),
        None => Err(not_found(format!("character '{character_id}'"))),
    }
}

/// DELETE /v1/characters/{character_id}
pub async fn delete_character(
    State(state): State<Arc<AppState>>,
    Path(character_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let deleted = state.characters.delete(&character_id).map_err(internal_error)?;
    if !deleted {
        return Err(not_found(format!("character '{character_id}'")));
    }
    Ok(Json(json!({ "deleted": character_id })))
}
