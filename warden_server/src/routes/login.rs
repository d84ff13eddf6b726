//! Login throttle routes
//!
//! `check` + `failed` is the current pattern; `attempt` + `success` is kept
//! for login servers that still count every attempt.

use crate::routes::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/login/check", post(check))
        .route("/api/login/failed", post(failed))
        .route("/api/login/attempt", post(attempt))
        .route("/api/login/success", post(success))
}

#[derive(Debug, Deserialize)]
pub struct ThrottleRequest {
    pub key: String,
}

async fn check(State(state): State<AppState>, Json(payload): Json<ThrottleRequest>) -> Response {
    Json(serde_json::json!({
        "blocked": state.throttle.is_login_attempt_blocked(&payload.key),
    }))
    .into_response()
}

async fn failed(State(state): State<AppState>, Json(payload): Json<ThrottleRequest>) -> Response {
    let warn = state.throttle.note_failed_login(&payload.key);
    Json(serde_json::json!({
        "warn": warn,
        "attempts": state.throttle.attempts(&payload.key),
    }))
    .into_response()
}

async fn attempt(State(state): State<AppState>, Json(payload): Json<ThrottleRequest>) -> Response {
    let allowed = state.throttle.note_login(&payload.key);
    let status = if allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    (status, Json(serde_json::json!({ "allowed": allowed }))).into_response()
}

async fn success(State(state): State<AppState>, Json(payload): Json<ThrottleRequest>) -> Response {
    state.throttle.note_login_success(&payload.key);
    Json(serde_json::json!({
        "attempts": state.throttle.attempts(&payload.key),
    }))
    .into_response()
}
