//! Route handlers for the Warden server

pub mod access;
pub mod admin;
pub mod login;

use crate::abuse::{AccessEngine, LoginThrottle};
use crate::account::{AccountId, AccountKey};
use crate::store::{Store, StoreError};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use warden_common::AccessResult;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AccessEngine<dyn Store>>,
    pub throttle: Arc<LoginThrottle>,
    /// Moderation routes are closed when this is `None`
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        engine: AccessEngine<dyn Store>,
        throttle: Arc<LoginThrottle>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            throttle,
            admin_token: admin_token.map(Arc::from),
        }
    }
}

/// Build the full API router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(access::router())
        .merge(login::router())
        .merge(admin::router())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Response {
    let store_status = match state.engine.store().ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!("Store ping failed: {}", e);
            "error"
        }
    };

    let status = if store_status == "ok" {
        "healthy"
    } else {
        "degraded"
    };

    Json(serde_json::json!({
        "status": status,
        "store": store_status,
        "throttled_keys": state.throttle.len(),
    }))
    .into_response()
}

/// Identifies one account in a request body. The first field present wins.
#[derive(Debug, Default, Deserialize)]
pub struct AccountRef {
    pub account_id: Option<AccountId>,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl AccountRef {
    pub fn key(&self) -> Option<AccountKey> {
        if let Some(id) = self.account_id {
            return Some(AccountKey::Id(id));
        }
        if let Some(username) = self.username.as_ref().filter(|u| !u.is_empty()) {
            return Some(AccountKey::Username(username.clone()));
        }
        self.email
            .as_ref()
            .filter(|e| !e.is_empty())
            .map(|email| AccountKey::Email(email.clone()))
    }
}

/// JSON body for an access decision
pub(crate) fn decision(result: AccessResult) -> Response {
    Json(serde_json::json!({
        "result": result,
        "granted": result.is_granted(),
        "message": result.message(),
    }))
    .into_response()
}

/// Store failures never become a decision
pub(crate) fn store_failure(err: StoreError) -> Response {
    tracing::error!("Store error: {}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "Store error").into_response()
}

pub(crate) fn missing_account() -> Response {
    (
        StatusCode::BAD_REQUEST,
        "One of account_id, username or email is required",
    )
        .into_response()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::abuse::{FreeAccountQuota, ThrottleConfig};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use warden_common::SiteTable;

    pub const ADMIN_TOKEN: &str = "test-admin-token";

    pub fn state(store: Arc<MemoryStore>) -> AppState {
        let store: Arc<dyn Store> = store;
        let engine = AccessEngine::new(
            store,
            Arc::new(SiteTable::builtin().clone()),
            FreeAccountQuota::default(),
        );
        AppState::new(
            engine,
            Arc::new(LoginThrottle::new(ThrottleConfig::new(3, 300))),
            Some(ADMIN_TOKEN.to_string()),
        )
    }

    /// Send one request and decode the JSON reply
    pub async fn send(
        state: &AppState,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_health() {
        let store = Arc::new(MemoryStore::new());
        let state = state(store.clone());

        let (status, body) = send(&state, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        store.set_unavailable(true);
        let (_, body) = send(&state, "GET", "/health", None, None).await;
        assert_eq!(body["status"], "degraded");
    }

    #[test]
    fn test_account_ref_precedence() {
        let by_all = AccountRef {
            account_id: Some(7),
            username: Some("bob".to_string()),
            email: None,
        };
        assert_eq!(by_all.key(), Some(AccountKey::Id(7)));

        let by_email = AccountRef {
            email: Some("bob@example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(
            by_email.key(),
            Some(AccountKey::Email("bob@example.com".to_string()))
        );
        assert_eq!(AccountRef::default().key(), None);
    }
}
