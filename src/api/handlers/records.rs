//! Record store pass-through for authenticated visitors.
//!
//! Query pairs become equality filters; the owner filter is always added by
//! [`ScopedStore`]. "Not found" is a `404` with a `null` body.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{error_response, visitor_id};
use crate::api::AppState;
use crate::auth::Session;
use crate::auth::retry::Retryable;
use crate::store::{Filters, PostgrestStore, Record, ScopedStore, StoreError};

/// Session of an authenticated visitor, cloned out so the router lock is not
/// held during store calls.
async fn app_session(state: &AppState, headers: &HeaderMap) -> Result<Session, Response> {
    let unauthorized = || error_response(StatusCode::UNAUTHORIZED, "Log in to continue");

    let visitor = visitor_id(headers).ok_or_else(unauthorized)?;
    let router = state
        .visitors()
        .existing(visitor)
        .await
        .ok_or_else(unauthorized)?;
    let session = router.lock().await.app_session().cloned();
    session.ok_or_else(unauthorized)
}

fn store_error(err: &StoreError) -> Response {
    match err {
        StoreError::InvalidIdentifier(_) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        StoreError::Rejected { status, message } => error_response(
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
            message.clone(),
        ),
        StoreError::Timeout => error_response(StatusCode::GATEWAY_TIMEOUT, err.to_string()),
        StoreError::Network(_)
        | StoreError::Upstream { .. }
        | StoreError::Decode(_)
        | StoreError::Config(_) => {
            warn!(retryable = err.is_retryable(), "Record store call failed: {err}");
            error_response(StatusCode::BAD_GATEWAY, "Record store unavailable")
        }
    }
}

fn scoped_store<'a>(
    state: &'a AppState,
    session: &Session,
) -> Result<ScopedStore<'a, PostgrestStore>, Response> {
    ScopedStore::new(state.store(), session, state.visitors().retry())
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Log in to continue"))
}

#[utoipa::path(
    get,
    path = "/v1/records/{table}",
    params(
        ("table" = String, Path, description = "Table name, e.g. `expenses`")
    ),
    responses(
        (status = 200, description = "First matching record", body = Object),
        (status = 401, description = "Not logged in"),
        (status = 404, description = "No matching record")
    ),
    tag = "records"
)]
pub async fn fetch_one(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(table): Path<String>,
    Query(filters): Query<Filters>,
) -> Response {
    let session = match app_session(&state, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let store = match scoped_store(&state, &session) {
        Ok(store) => store,
        Err(response) => return response,
    };
    match store.fetch_one(&table, filters).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(Value::Null)).into_response(),
        Err(err) => store_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/records/{table}",
    params(
        ("table" = String, Path, description = "Table name")
    ),
    request_body = Object,
    responses(
        (status = 201, description = "Stored record", body = Object),
        (status = 401, description = "Not logged in")
    ),
    tag = "records"
)]
pub async fn insert(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(table): Path<String>,
    Json(record): Json<Record>,
) -> Response {
    let session = match app_session(&state, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let store = match scoped_store(&state, &session) {
        Ok(store) => store,
        Err(response) => return response,
    };
    match store.insert(&table, record).await {
        Ok(stored) => (StatusCode::CREATED, Json(stored)).into_response(),
        Err(err) => store_error(&err),
    }
}

#[utoipa::path(
    patch,
    path = "/v1/records/{table}",
    params(
        ("table" = String, Path, description = "Table name")
    ),
    request_body = Object,
    responses(
        (status = 204, description = "Matching records updated"),
        (status = 400, description = "No filter given"),
        (status = 401, description = "Not logged in")
    ),
    tag = "records"
)]
pub async fn update(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(table): Path<String>,
    Query(filters): Query<Filters>,
    Json(patch): Json<Record>,
) -> Response {
    if filters.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "At least one filter is required");
    }
    let session = match app_session(&state, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let store = match scoped_store(&state, &session) {
        Ok(store) => store,
        Err(response) => return response,
    };
    match store.update(&table, filters, patch).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error(&err),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/records/{table}",
    params(
        ("table" = String, Path, description = "Table name")
    ),
    responses(
        (status = 204, description = "Matching records deleted"),
        (status = 400, description = "No filter given"),
        (status = 401, description = "Not logged in")
    ),
    tag = "records"
)]
pub async fn delete(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(table): Path<String>,
    Query(filters): Query<Filters>,
) -> Response {
    if filters.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "At least one filter is required");
    }
    let session = match app_session(&state, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let store = match scoped_store(&state, &session) {
        Ok(store) => store,
        Err(response) => return response,
    };
    debug!(table = %table, "Deleting records");
    match store.delete(&table, filters).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error(&err),
    }
}
