//! Best-effort reader for bearer token claims.
//!
//! Security boundaries: the signature is never checked. Values returned here
//! are routing hints only (pre-filling a user id or email while the real
//! profile is unavailable) and must never authorize an action.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::Value;

/// Decode the payload segment of a bearer token and return `claim` as a string.
///
/// Returns `None` for anything that is not a three-part token with a JSON
/// object payload, and for `null` claims. Never panics.
#[must_use]
pub fn read_claim(token: &str, claim: &str) -> Option<String> {
    let mut segments = token.split('.');
    let (_header, payload) = (segments.next()?, segments.next()?);
    segments.next()?;

    // Providers differ on whether the payload keeps its `=` padding.
    let payload = payload.trim_end_matches('=');
    if payload.is_empty() {
        return None;
    }

    let bytes = Base64UrlUnpadded::decode_vec(payload).ok()?;
    let Value::Object(claims) = serde_json::from_slice::<Value>(&bytes).ok()? else {
        return None;
    };

    match claims.get(claim)? {
        Value::Null => None,
        Value::String(value) => Some(value.clone()),
        other => Some(other.to_string()),
    }
}
