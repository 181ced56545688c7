//! Session clock endpoints. Every mutation persists the clock snapshot back
//! to the working database.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use muse_clock::{SessionClock, TimeAction, TimeFormat};
use muse_core::types::TIME_FORMAT;

use crate::app::AppState;
use crate::http::{bad_request, internal_error};

#[derive(Debug, Serialize)]
pub struct TimeClockResponse {
    pub session_id: String,
    pub base_virtual: String,
    pub base_real: String,
    pub actions: Vec<TimeAction>,
    pub current_virtual_time: String,
    pub current_real_time: String,
    pub updated_at: Option<String>,
    pub real_updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimeClockRequest {
    #[serde(default)]
    pub base_virtual: Option<String>,
    #[serde(default)]
    pub actions: Option<Vec<TimeAction>>,
    #[serde(default)]
    pub rebase: bool,
}

#[derive(Debug, Deserialize)]
pub struct TimeSeekRequest {
    pub virtual_time: String,
}

#[derive(Debug, Deserialize)]
pub struct TimeNudgeRequest {
    pub delta_seconds: f64,
}

#[derive(Debug, Deserialize)]
pub struct TimeSpeedRequest {
    pub speed: f64,
}

fn build_response(state: &AppState, session_id: &str, clock: &SessionClock) -> TimeClockResponse {
    TimeClockResponse {
        session_id: session_id.to_string(),
        base_virtual: clock.base_virtual.format(TIME_FORMAT).to_string(),
        base_real: clock.base_real.format(TIME_FORMAT).to_string(),
        actions: clock.actions.clone(),
        current_virtual_time: state.clock.now_str(TimeFormat::Readable, Some(session_id)),
        current_real_time: state.clock.real_now_str(TimeFormat::Readable),
        updated_at: clock.updated_at.clone(),
        real_updated_at: clock.real_updated_at.clone(),
    }
}

fn persist(state: &AppState, session_id: &str, clock: &SessionClock) -> Result<(), (StatusCode, Json<Value>)> {
    let actions_json = serde_json::to_string(&clock.actions).map_err(internal_error)?;
    state
        .stores
        .session_clocks
        .insert_or_update(
            session_id,
            &clock.base_virtual.format(TIME_FORMAT).to_string(),
            &clock.base_real.format(TIME_FORMAT).to_string(),
            &actions_json,
        )
        .map_err(internal_error)
}

/// GET /v1/sessions/{id}/time
pub async fn get_session_time(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<TimeClockResponse>, (StatusCode, Json<Value>)> {
    let clock = state.clock.get_session_clock(&session_id);
    Ok(Json(build_response(&state, &session_id, &clock)))
}

/// PUT /v1/sessions/{id}/time
pub async fn update_session_time(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<TimeClockRequest>,
) -> Result<Json<TimeClockResponse>, (StatusCode, Json<Value>)> {
    let clock = state
        .clock
        .update_session_clock(
            &session_id,
            request.base_virtual.as_deref(),
            request.actions,
            request.rebase,
        )
        .map_err(bad_request)?;
    persist(&state, &session_id, &clock)?;
    Ok(Json(build_response(&state, &session_id, &clock)))
}

/// POST /v1/sessions/{id}/time/seek
pub async fn seek_session_time(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<TimeSeekRequest>,
) -> Result<Json<TimeClockResponse>, (StatusCode, Json<Value>)> {
    let clock = state
        .clock
        .seek(&session_id, &request.virtual_time)
        .map_err(bad_request)?;
    persist(&state, &session_id, &clock)?;
    Ok(Json(build_response(&state, &session_id, &clock)))
}

/// POST /v1/sessions/{id}/time/nudge
pub async fn nudge_session_time(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<TimeNudgeRequest>,
) -> Result<Json<TimeClockResponse>, (StatusCode, Json<Value>)> {
    let clock = state.clock.nudge(&session_id, request.delta_seconds);
    persist(&state, &session_id, &clock)?;
    Ok(Json(build_response(&state, &session_id, &clock)))
}

/// POST /v1/sessions/{id}/time/speed
pub async fn set_session_time_speed(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<TimeSpeedRequest>,
) -> Result<Json<TimeClockResponse>, (StatusCode, Json<Value>)> {
    let clock = state.clock.set_speed(&session_id, request.speed);
    persist(&state, &session_id, &clock)?;
    Ok(Json(build_response(&state, &session_id, &clock)))
}
