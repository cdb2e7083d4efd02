//! Route endpoints: wall-display summaries and the collector action.

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::route_state;
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RoutesQuery {
    pub shift_id: Option<Uuid>,
}

/// GET /api/routes?shift_id=, per-route summaries, defaulting to the
/// active shift
pub async fn list_routes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RoutesQuery>,
) -> ApiResult<Json<Value>> {
    let mut conn = state.pool.acquire().await?;

    let shift_id = match query.shift_id {
        Some(id) => id,
        None => db::shifts::active_shift(&mut conn)
            .await?
            .ok_or(ApiError::NoActiveShift)?
            .id,
    };

    let summaries = db::route_days::summaries_for_shift(&mut conn, shift_id).await?;
    Ok(Json(json!({ "routes": summaries })))
}

/// POST /api/routes/:route_id/mark-collected
pub async fn mark_collected(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let actor = super::actor_from_headers(&headers);
    route_state::mark_collected(&state.pool, &state.publisher, route_id, actor.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true })))
}
