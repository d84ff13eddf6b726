//! Moderation routes
//!
//! Every route requires `Authorization: Bearer <ADMIN_TOKEN>`.

use crate::routes::{missing_account, store_failure, AccountRef, AppState};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http::header::AUTHORIZATION;
use serde::Deserialize;
use warden_common::SiteId;

/// Build the admin router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/ban", post(ban))
        .route("/api/admin/unban", post(unban))
        .route("/api/admin/taint", post(taint))
        .route("/api/admin/taint-account", post(taint_account))
        .route("/api/admin/untaint", post(untaint))
        .route("/api/admin/ban-ident", post(ban_ident))
        .route("/api/admin/unban-ident", post(unban_ident))
        .route("/api/admin/deadbeat", post(deadbeat))
        .route("/api/admin/disable", post(disable))
        .route("/api/admin/filter-tainted", post(filter_tainted))
        .route("/api/admin/filter-banned", post(filter_banned))
        .route("/api/admin/ident-users", get(ident_users))
        .route("/api/admin/idents-users", post(idents_users))
}

/// Validate admin token from the Authorization header
fn validate_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(admin_token) = state.admin_token.as_deref() else {
        return false;
    };

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t == admin_token)
        .unwrap_or(false)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub site: SiteId,
    #[serde(flatten)]
    pub account: AccountRef,
    #[serde(default)]
    pub untaint: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeadbeatRequest {
    pub site: SiteId,
    #[serde(flatten)]
    pub account: AccountRef,
    pub deadbeat: bool,
}

#[derive(Debug, Deserialize)]
pub struct IdentRequest {
    pub ident: String,
}

#[derive(Debug, Deserialize)]
pub struct SiteIdentRequest {
    pub ident: String,
    pub site: SiteId,
}

#[derive(Debug, Deserialize)]
pub struct IdentsRequest {
    pub idents: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub idents: Vec<String>,
    pub site: Option<SiteId>,
}

fn changed(changed: bool) -> Response {
    Json(serde_json::json!({ "changed": changed })).into_response()
}

fn ok() -> Response {
    Json(serde_json::json!({ "ok": true })).into_response()
}

async fn ban(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<BanRequest>) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    let Some(key) = payload.account.key() else {
        return missing_account();
    };
    match state.engine.ban(payload.site, &key).await {
        Ok(done) => changed(done),
        Err(e) => store_failure(e),
    }
}

async fn unban(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<BanRequest>) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    let Some(key) = payload.account.key() else {
        return missing_account();
    };
    match state.engine.unban(payload.site, &key, payload.untaint).await {
        Ok(done) => changed(done),
        Err(e) => store_failure(e),
    }
}

async fn deadbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<DeadbeatRequest>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    let Some(key) = payload.account.key() else {
        return missing_account();
    };
    match state.engine.set_deadbeat(payload.site, &key, payload.deadbeat).await {
        Ok(done) => changed(done),
        Err(e) => store_failure(e),
    }
}

async fn disable(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AccountRef>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    let Some(key) = payload.key() else {
        return missing_account();
    };
    match state.engine.disable_account(&key).await {
        Ok(Some(username)) => Json(serde_json::json!({ "username": username })).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Account not found").into_response(),
        Err(e) => store_failure(e),
    }
}

async fn taint(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<IdentRequest>) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    match state.engine.taint(&payload.ident).await {
        Ok(()) => ok(),
        Err(e) => store_failure(e),
    }
}

async fn taint_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AccountRef>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    let Some(key) = payload.key() else {
        return missing_account();
    };
    match state.engine.taint_account(&key).await {
        Ok(done) => changed(done),
        Err(e) => store_failure(e),
    }
}

async fn untaint(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<IdentRequest>) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    match state.engine.untaint(&payload.ident).await {
        Ok(()) => ok(),
        Err(e) => store_failure(e),
    }
}

async fn ban_ident(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SiteIdentRequest>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    match state.engine.ban_ident(&payload.ident, payload.site).await {
        Ok(()) => ok(),
        Err(e) => store_failure(e),
    }
}

async fn unban_ident(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SiteIdentRequest>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    match state.engine.unban_ident(&payload.ident, payload.site).await {
        Ok(()) => ok(),
        Err(e) => store_failure(e),
    }
}

async fn filter_tainted(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<FilterRequest>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    match state.engine.filter_tainted(&payload.idents).await {
        Ok(idents) => Json(serde_json::json!({ "idents": idents })).into_response(),
        Err(e) => store_failure(e),
    }
}

async fn filter_banned(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<FilterRequest>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    let Some(site) = payload.site else {
        return (StatusCode::BAD_REQUEST, "site is required").into_response();
    };
    match state.engine.filter_banned(&payload.idents, site).await {
        Ok(idents) => Json(serde_json::json!({ "idents": idents })).into_response(),
        Err(e) => store_failure(e),
    }
}

/// Accounts that have reported an ident
async fn ident_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<IdentRequest>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    let users = match state.engine.users_of_ident(&params.ident).await {
        Ok(users) => users,
        Err(e) => return store_failure(e),
    };
    let tainted = match state.engine.ledger().is_tainted(&params.ident).await {
        Ok(tainted) => tainted,
        Err(e) => return store_failure(e),
    };

    Json(serde_json::json!({
        "ident": params.ident,
        "tainted": tainted,
        "count": users.len(),
        "users": users,
    }))
    .into_response()
}

/// Accounts that have reported any of several idents
async fn idents_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<IdentsRequest>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }
    match state.engine.users_of_idents(&payload.idents).await {
        Ok(users) => Json(serde_json::json!({ "users": users })).into_response(),
        Err(e) => store_failure(e),
    }
}
