//! Shift endpoints: open, close, current.

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::shifts;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct OpenShiftRequest {
    pub slot: String,
    pub date: String,
}

/// POST /api/shifts/open
pub async fn open_shift(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<OpenShiftRequest>,
) -> ApiResult<Json<Value>> {
    let actor = super::actor_from_headers(&headers);
    let shift = shifts::open_shift(
        &state.pool,
        &state.publisher,
        state.ingest.as_ref(),
        &req.slot,
        &req.date,
        actor.as_deref(),
    )
    .await?;

    Ok(Json(json!({
        "id": shift.id,
        "state": shift.state,
        "started_at": shift.started_at,
        "scheduled_end_at": shift.scheduled_end_at,
    })))
}

/// POST /api/shifts/:id/close
pub async fn close_shift(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let actor = super::actor_from_headers(&headers);
    let shift = shifts::close_shift(&state.pool, &state.publisher, Some(id), actor.as_deref())
        .await?;

    Ok(Json(json!({
        "id": shift.id,
        "state": shift.state,
        "ended_at": shift.ended_at,
    })))
}

/// GET /api/shifts/active: the active shift with its configuration
pub async fn active_shift(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let mut conn = state.pool.acquire().await?;

    let Some(shift) = db::shifts::active_shift(&mut conn).await? else {
        return Err(ApiError::NoActiveShift);
    };

    let qualifications = db::shifts::qualifications(&mut conn, shift.id).await?;
    let collectors = db::shifts::collectors(&mut conn, shift.id).await?;

    Ok(Json(json!({
        "id": shift.id,
        "date": shift.date,
        "slot": shift.slot,
        "state": shift.state,
        "started_at": shift.started_at,
        "scheduled_end_at": shift.scheduled_end_at,
        "qualifications": qualifications,
        "collectors": collectors,
    })))
}
