pub mod archives;
pub mod characters;
pub mod chat;
pub mod frontend;
pub mod health;
pub mod memory;
pub mod models;
pub mod search;
pub mod sessions;
pub mod time;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

/// Structured error body: `{"error": {"message", "code"}}`.
pub fn error_body(code: &str, message: impl std::fmt::Display) -> Json<Value> {
    Json(json!({ "error": { "message": message.to_string(), "code": code } }))
}

pub fn bad_request(message: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, error_body("VALIDATION_ERROR", message))
}

pub fn not_found(message: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, error_body("NOT_FOUND", message))
}

pub fn internal_error(message: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, error_body("INTERNAL_ERROR", message))
}

/// Map a storage error onto the HTTP taxonomy.
pub fn storage_error(e: muse_storage::StorageError) -> (StatusCode, Json<Value>) {
    match &e {
        muse_storage::StorageError::NotFound(_) => not_found(e),
        muse_storage::StorageError::Archive(_) | muse_storage::StorageError::InvalidInput(_) => {
            bad_request(e)
        }
        _ => internal_error(e),
    }
}

/// Map a core error onto the HTTP taxonomy.
pub fn muse_error(e: muse_core::MuseError) -> (StatusCode, Json<Value>) {
    match &e {
        muse_core::MuseError::Validation(_) => bad_request(e),
        _ => internal_error(e),
    }
}
