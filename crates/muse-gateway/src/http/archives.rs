//! Archive management. Loading an archive (or resetting the working
//! database) triggers a full search-mirror reindex.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::app::AppState;
use crate::http::{internal_error, storage_error};

#[derive(Debug, Deserialize)]
pub struct CreateArchiveRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// Create an empty archive instead of snapshotting the working database.
    #[serde(default)]
    pub empty: bool,
}

/// GET /v1/archives
pub async fn list_archives(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let archives = state.db.list_archives().map_err(storage_error)?;
    Ok(Json(json!({ "archives": archives })))
}

/// POST /v1/archives
pub async fn create_archive(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateArchiveRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let name = match request.name {
        Some(name) => name,
        None => state
            .db
            .generate_default_archive_name()
            .map_err(storage_error)?,
    };
    let created = if request.empty {
        state.db.create_empty_archive(&name)
    } else {
        state.db.create_archive(&name)
    }
    .map_err(storage_error)?;
    Ok(Json(json!({ "name": created })))
}

/// PUT /v1/archives/{name}
pub async fn overwrite_archive(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let name = state.db.overwrite_archive(&name).map_err(storage_error)?;
    Ok(Json(json!({ "name": name })))
}

/// DELETE /v1/archives/{name}
pub async fn delete_archive(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.db.delete_archive(&name).map_err(storage_error)?;
    Ok(Json(json!({ "deleted": name })))
}

/// POST /v1/archives/{name}/load — copy the archive over the working
/// database, drop cached clocks, and rebuild the search mirror.
pub async fn load_archive(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.db.load_archive(&name).map_err(storage_error)?;
    state.clock.clear_cache();
    state.stores.reindex_mirror().await;
    info!(name, "archive loaded and mirror reindexed");
    Ok(Json(json!({ "loaded": name })))
}

/// POST /v1/archives/reset — recreate an empty working database.
pub async fn reset_working(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.db.reset_working().map_err(internal_error)?;
    state.clock.clear_cache();
    state.stores.reindex_mirror().await;
    Ok(Json(json!({ "reset": true })))
}
