//! HTTP handlers and the visitor cookie they share.

pub mod health;
pub mod records;
pub mod render;

use axum::{
    http::{header::InvalidHeaderValue, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::time::Duration;
use ulid::Ulid;

pub const VISITOR_COOKIE_NAME: &str = "spendline_visitor";

/// Visitor id from the cookie header; malformed values count as absent.
pub fn visitor_id(headers: &HeaderMap) -> Option<Ulid> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let Some((key, val)) = trimmed.split_once('=') else {
            continue;
        };
        if key.trim() == VISITOR_COOKIE_NAME {
            return Ulid::from_string(val.trim()).ok();
        }
    }
    None
}

/// Build the `HttpOnly` visitor cookie; it lives as long as an idle visit and
/// is re-issued on every render so it slides with the server-side visit.
pub fn visitor_cookie(
    visitor: Ulid,
    ttl: Duration,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = ttl.as_secs();
    let mut cookie = format!(
        "{VISITOR_COOKIE_NAME}={visitor}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}
