//! Wire-shape checks over the HTTP boundary that don't need a model endpoint:
//! sessions, virtual time, archives, relations, frontend messages.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use muse_clock::TimeProvider;
use muse_core::config::MuseConfig;
use muse_memory::Stores;
use muse_search::SearchService;
use muse_storage::{DatabaseManager, SessionClockRepository};

fn build_test_app(dir: &tempfile::TempDir) -> axum::Router {
    let mut config = MuseConfig::default();
    config.database.data_dir = dir.path().to_string_lossy().to_string();

    let db = Arc::new(DatabaseManager::new(dir.path()).unwrap());
    let clock = Arc::new(TimeProvider::new());
    let search = Arc::new(SearchService::new(&config.meilisearch));
    let loader_repo = SessionClockRepository::new(db.clone(), clock.clone());
    clock.set_loader(Box::new(move |session_id| {
        loader_repo.get_by_session_id(session_id).ok().flatten()
    }));
    let stores = Stores::new(db.clone(), clock.clone(), search.clone());
    let state = Arc::new(muse_gateway::app::AppState::new(
        config, db, clock, search, stores,
    ));
    muse_gateway::app::build_router(state)
}

async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            builder.body(Body::from(body.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(&dir);
    let (status, body) = request_json(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn seek_then_nudge_reports_offset_action() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(&dir);

    let (status, body) = request_json(
        &app,
        "POST",
        "/v1/sessions/s1/time/seek",
        Some(json!({"virtual_time": "2030-01-01 00:00:00"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["base_virtual"], "2030-01-01 00:00:00");
    assert_eq!(body["actions"].as_array().unwrap().len(), 0);

    let (status, body) = request_json(
        &app,
        "POST",
        "/v1/sessions/s1/time/nudge",
        Some(json!({"delta_seconds": 3600.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["base_virtual"], "2030-01-01 00:00:00");
    let actions = body["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["type"], "offset");
    assert_eq!(actions[0]["value"], 3600.0);

    // current_virtual_time ≈ 2030-01-01 01:00:00 plus real elapsed since seek.
    let (status, body) = request_json(&app, "GET", "/v1/sessions/s1/time", None).await;
    assert_eq!(status, StatusCode::OK);
    let current = body["current_virtual_time"].as_str().unwrap();
    assert!(current.starts_with("2030-01-01 01:00"), "got {current}");
}

#[tokio::test]
async fn invalid_seek_time_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(&dir);
    let (status, body) = request_json(
        &app,
        "POST",
        "/v1/sessions/s1/time/seek",
        Some(json!({"virtual_time": "2030/01/01"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn archive_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(&dir);

    let (status, body) = request_json(
        &app,
        "POST",
        "/v1/archives",
        Some(json!({"name": "save one"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "save_one");

    let (_, body) = request_json(&app, "GET", "/v1/archives", None).await;
    let names: Vec<&str> = body["archives"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"save_one"));

    // Duplicate name is rejected.
    let (status, _) = request_json(
        &app,
        "POST",
        "/v1/archives",
        Some(json!({"name": "save one"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request_json(&app, "POST", "/v1/archives/save_one/load", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request_json(&app, "DELETE", "/v1/archives/save_one", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request_json(&app, "DELETE", "/v1/archives/save_one", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn relation_crud_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(&dir);

    let (status, body) = request_json(
        &app,
        "POST",
        "/v1/relations",
        Some(json!({
            "session_id": "s1",
            "relation_id": "r1",
            "name": "Ann",
            "knowledge": "likes tea"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["relation"]["relation_id"], "r1");

    let (_, body) = request_json(&app, "GET", "/v1/relations?session_id=s1", None).await;
    assert_eq!(body["relations"].as_array().unwrap().len(), 1);

    let (status, body) = request_json(
        &app,
        "PUT",
        "/v1/relations/r1",
        Some(json!({"session_id": "s1", "progress": "friends"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["relation"]["progress"], "friends");

    let (status, _) =
        request_json(&app, "DELETE", "/v1/relations/r1?session_id=s1", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) =
        request_json(&app, "DELETE", "/v1/relations/r1?session_id=s1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn frontend_messages_upsert_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(&dir);

    for content in ["first", "edited"] {
        let (status, _) = request_json(
            &app,
            "POST",
            "/v1/frontend-messages",
            Some(json!({
                "session_id": "s1",
                "client_message_id": "c1",
                "role": "user",
                "content": content,
                "display_order": 1
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) =
        request_json(&app, "GET", "/v1/frontend-messages?session_id=s1", None).await;
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "edited");

    // Session list now includes s1 (auto-created on first write).
    let (_, body) = request_json(&app, "GET", "/v1/sessions", None).await;
    let ids: Vec<&str> = body["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"s1"));
}

#[tokio::test]
async fn chat_completion_rejects_missing_session() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(&dir);
    let (status, _) = request_json(
        &app,
        "POST",
        "/v1/chat/completions",
        Some(json!({
            "user_input": "hi",
            "input_mode": "phone",
            "session_id": ""
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
