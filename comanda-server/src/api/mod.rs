//! HTTP handlers, grouped by surface.

pub mod events;
pub mod imap;
pub mod print;
pub mod routes;
pub mod shifts;
pub mod sse;

use crate::error::{ApiError, ApiResult};
use axum::http::HeaderMap;

/// Actor attribution header. Authentication itself is an external
/// collaborator; the core only consumes the resolved user id.
pub const ACTOR_HEADER: &str = "x-actor";

pub fn actor_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Operator endpoints need to know who is printing
pub fn require_actor(headers: &HeaderMap) -> ApiResult<String> {
    actor_from_headers(headers).ok_or(ApiError::AuthRequired)
}
