use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use muse_storage::ModelRecord;

use crate::app::AppState;
use crate::http::{internal_error, not_found};

fn redact(mut record: ModelRecord) -> ModelRecord {
    if !record.api_key.is_empty() {
        record.api_key = "********".to_string();
    }
    record
}

/// GET /v1/models — API keys are redacted on the way out.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let models: Vec<ModelRecord> = state
        .models
        .list()
        .map_err(internal_error)?
        .into_iter()
        .map(redact)
        .collect();
    Ok(Json(json!({ "models": models })))
}

/// POST /v1/models — the key is enveloped before it reaches disk.
pub async fn upsert_model(
    State(state): State<Arc<AppState>>,
    Json(record): Json<ModelRecord>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.models.upsert(&record).map_err(internal_error)?;
    Ok(Json(json!({ "model": redact(record) })))
}

/// GET /v1/models/{model_id}
pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.models.get(&model_id).map_err(internal_error)? {
        Some(model) => Ok(Json(json!({ "model": redact(model) }))),
        None => Err(not_found(format!("model '{model_id}'"))),
    }
}

/// DELETE /v1/models/{model_id}
pub async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let deleted = state.models.delete(&model_id).map_err(internal_error)?;
    if !deleted {
        return Err(not_found(format!("model '{model_id}'")));
    }
    Ok(Json(json!({ "deleted": model_id })))
}
