//! Paged event history.

use crate::db::events::EventFilter;
use crate::error::ApiResult;
use crate::pagination::{calculate_pagination, PAGE_SIZE};
use crate::server::AppState;
use crate::{db, error::ApiError};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct EventHistoryQuery {
    pub page: Option<i64>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// RFC 3339 timestamp; only events strictly later are returned
    pub since: Option<String>,
}

/// GET /api/events: newest first, 100 per page
pub async fn event_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventHistoryQuery>,
) -> ApiResult<Json<Value>> {
    let since = query
        .since
        .as_deref()
        .map(|raw| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|_| ApiError::BadRequest(format!("invalid since timestamp: {}", raw)))
        })
        .transpose()?;

    let filter = EventFilter {
        event_type: query.event_type,
        entity_type: query.entity_type,
        entity_id: query.entity_id,
        since,
    };

    let mut conn = state.pool.acquire().await?;

    // Count first so the requested page can be clamped.
    let (_, total) = db::events::query_page(&mut conn, &filter, 0, 0).await?;
    let pagination = calculate_pagination(total, query.page.unwrap_or(1));
    let (events, _) =
        db::events::query_page(&mut conn, &filter, PAGE_SIZE, pagination.offset).await?;

    Ok(Json(json!({
        "events": events,
        "pagination": pagination,
    })))
}
