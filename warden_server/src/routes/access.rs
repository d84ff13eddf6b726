//! Access decision routes called by the login and game servers

use crate::routes::{decision, missing_account, store_failure, AccountRef, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use warden_common::SiteId;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/access/validate", post(validate_user))
        .route("/api/access/can-create", post(can_create))
        .route("/api/access/validate-ident", post(validate_ident))
}

#[derive(Debug, Deserialize)]
pub struct ValidateUserRequest {
    pub site: SiteId,
    #[serde(flatten)]
    pub account: AccountRef,
    pub ident: String,
    #[serde(default)]
    pub new_player: bool,
}

#[derive(Debug, Deserialize)]
pub struct CanCreateRequest {
    pub ident: String,
    pub site: Option<SiteId>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateIdentRequest {
    pub site: SiteId,
    pub ident: String,
    #[serde(default)]
    pub new_player: bool,
}

async fn validate_user(
    State(state): State<AppState>,
    Json(payload): Json<ValidateUserRequest>,
) -> Response {
    let Some(key) = payload.account.key() else {
        return missing_account();
    };

    let mut account = match state.engine.load_account(&key).await {
        Ok(Some(account)) => account,
        Ok(None) => return (StatusCode::NOT_FOUND, "Account not found").into_response(),
        Err(e) => return store_failure(e),
    };

    match state
        .engine
        .validate_user(payload.site, &mut account, &payload.ident, payload.new_player)
        .await
    {
        Ok(result) => decision(result),
        Err(e) => store_failure(e),
    }
}

async fn can_create(
    State(state): State<AppState>,
    Json(payload): Json<CanCreateRequest>,
) -> Response {
    match state.engine.check_can_create(&payload.ident, payload.site).await {
        Ok(result) => decision(result),
        Err(e) => store_failure(e),
    }
}

async fn validate_ident(
    State(state): State<AppState>,
    Json(payload): Json<ValidateIdentRequest>,
) -> Response {
    match state
        .engine
        .validate_ident(payload.site, &payload.ident, payload.new_player)
        .await
    {
        Ok(result) => decision(result),
        Err(e) => store_failure(e),
    }
}
