//! Ingest debug surface: worker status and the force-poll nudge.

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /api/imap/status
pub async fn imap_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let Some(ingest) = &state.ingest else {
        return Ok(Json(json!({
            "running": false,
            "connected": false,
            "last_error": "IMAP is not configured",
            "last_poll_at": null,
            "cursor": null,
        })));
    };

    let status = ingest.status().await;
    let cursor = ingest.cursor().await?;

    Ok(Json(json!({
        "running": status.running,
        "connected": status.connected,
        "last_error": status.last_error,
        "last_poll_at": status.last_poll_at,
        "cursor": {
            "last_uid": cursor.last_uid,
            "uidvalidity": cursor.uidvalidity,
        },
    })))
}

/// POST /api/imap/force-poll: run one poll cycle now
pub async fn force_poll(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let ingest = state
        .ingest
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("IMAP is not configured".to_string()))?;

    ingest
        .poll_now()
        .await
        .map_err(|e| ApiError::Internal(format!("poll failed: {}", e)))?;

    Ok(Json(json!({ "ok": true })))
}
