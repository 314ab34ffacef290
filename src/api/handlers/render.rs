//! One render pass per request.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use url::Url;
use utoipa::ToSchema;

use super::{error_response, visitor_cookie, visitor_id};
use crate::api::AppState;
use crate::auth::{UserAction, View};

#[derive(ToSchema, Deserialize, Debug)]
pub struct RenderRequest {
    /// Full browser URL, fragment included.
    url: String,
    #[serde(default)]
    action: Option<UserAction>,
}

#[utoipa::path(
    post,
    path = "/v1/render",
    request_body = RenderRequest,
    responses(
        (status = 200, description = "Screen to render; apply `location` with a history replace", body = View),
        (status = 400, description = "Unparseable URL")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn render(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<RenderRequest>,
) -> impl IntoResponse {
    let url = match Url::parse(&request.url) {
        Ok(url) => url,
        Err(err) => {
            debug!("Rejecting render for unparseable URL: {err}");
            return error_response(StatusCode::BAD_REQUEST, "Invalid URL");
        }
    };

    let visitor = visitor_id(&headers);
    let (id, router) = state.visitors().checkout(visitor).await;
    let view: View = router.lock().await.render(&url, request.action).await;

    if visitor != Some(id) {
        debug!(visitor = %id, "Started a new visit");
    }

    // The visit's idle timer restarts on every checkout, so the cookie must too.
    let mut response_headers = HeaderMap::new();
    match visitor_cookie(id, state.visitors().ttl(), state.secure_cookies()) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build visitor cookie: {err}"),
    }

    (StatusCode::OK, response_headers, Json(view)).into_response()
}
