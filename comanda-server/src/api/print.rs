//! Print endpoints: enter, operator initial/new, collector new, reprint.

use crate::db;
use crate::db::route_days::RouteDay;
use crate::error::{ApiError, ApiResult};
use crate::printing::render::ComandaDocument;
use crate::printing::selector::PrintLine;
use crate::printing::{self, jobs, selector, PrintKind};
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct PrintJobResponse {
    pub job_id: Uuid,
    pub lines_count: usize,
    pub pdf_url: String,
}

async fn load_route_day(state: &AppState, route_id: Uuid) -> ApiResult<RouteDay> {
    let mut conn = state.pool.acquire().await?;
    db::route_days::find_by_id(&mut conn, route_id)
        .await?
        .ok_or_else(|| ApiError::RouteNotFound(route_id.to_string()))
}

/// Render, store and commit one job. A renderer failure records a FAILED
/// job and surfaces a 5xx; nothing is stamped then.
async fn emit_job(
    state: &AppState,
    kind: PrintKind,
    day: &RouteDay,
    operator: Option<&str>,
    actor: Option<&str>,
    lines: Vec<PrintLine>,
    cutoff_lote: Option<Uuid>,
    from_lote: Option<Uuid>,
) -> ApiResult<Json<PrintJobResponse>> {
    if lines.is_empty() {
        return Err(ApiError::NothingToPrint);
    }

    let document = ComandaDocument {
        kind,
        route_norm: day.route_norm.clone(),
        operator: operator.map(|o| o.to_string()),
        lines,
    };

    let job_id = Uuid::new_v4();
    let bytes = match state.renderer.render(&document) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(route = %day.route_norm, error = %e, "comanda rendering failed");
            jobs::record_failed_job(
                &state.pool,
                kind,
                day.shift_id,
                &day.route_norm,
                actor,
                &e.to_string(),
            )
            .await?;
            return Err(ApiError::Internal(format!("rendering failed: {}", e)));
        }
    };

    let pdf_ref = state.pdf_store.store(job_id, &bytes)?;

    jobs::commit_print_job(
        &state.pool,
        &state.publisher,
        job_id,
        jobs::PrintCommit {
            kind,
            shift_id: day.shift_id,
            route_norm: &day.route_norm,
            actor,
            operator,
            lines: &document.lines,
            pdf_ref: &pdf_ref,
            cutoff_lote,
            from_lote,
        },
    )
    .await?;

    Ok(Json(PrintJobResponse {
        job_id,
        lines_count: document.lines.len(),
        pdf_url: format!("/comandas/{}", pdf_ref),
    }))
}

/// POST /api/print/routes/:route_id/operator/enter
pub async fn operator_enter(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let operator = super::require_actor(&headers)?;
    let outcome =
        printing::enter_route(&state.pool, &state.publisher, route_id, &operator).await?;

    Ok(Json(json!({
        "cutoff_lote": outcome.cutoff_lote,
        "entered": outcome.entered,
    })))
}

/// POST /api/print/routes/:route_id/operator/print-initial
pub async fn operator_print_initial(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<PrintJobResponse>> {
    let operator = super::require_actor(&headers)?;
    let day = load_route_day(&state, route_id).await?;

    let progress = {
        let mut conn = state.pool.acquire().await?;
        db::progress::operator_progress(&mut conn, day.shift_id, &operator, &day.route_norm)
            .await?
            .ok_or(ApiError::NoEnter)?
    };

    if progress.last_printed_lote.is_some() {
        return Err(ApiError::ValidationBlocked(
            "initial print already emitted for this route".to_string(),
        ));
    }

    let lines = {
        let mut conn = state.pool.acquire().await?;
        selector::operator_initial(
            &mut conn,
            day.shift_id,
            &day.route_norm,
            &operator,
            progress.cutoff_lote,
        )
        .await?
    };

    emit_job(
        &state,
        PrintKind::OperatorInitial,
        &day,
        Some(&operator),
        Some(&operator),
        lines,
        progress.cutoff_lote,
        None,
    )
    .await
}

/// POST /api/print/routes/:route_id/operator/print-new
pub async fn operator_print_new(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<PrintJobResponse>> {
    let operator = super::require_actor(&headers)?;
    let day = load_route_day(&state, route_id).await?;

    let progress = {
        let mut conn = state.pool.acquire().await?;
        db::progress::operator_progress(&mut conn, day.shift_id, &operator, &day.route_norm)
            .await?
            .ok_or(ApiError::NoEnter)?
    };

    // The "new" boundary is the last print; an operator who entered an
    // empty route (null cutoff) starts from the beginning without an
    // initial print.
    let boundary = match (progress.last_printed_lote, progress.cutoff_lote) {
        (Some(after), _) => Some(after),
        (None, None) => None,
        (None, Some(_)) => return Err(ApiError::NoInitial),
    };

    let lines = {
        let mut conn = state.pool.acquire().await?;
        selector::operator_new(&mut conn, day.shift_id, &day.route_norm, &operator, boundary)
            .await?
    };

    emit_job(
        &state,
        PrintKind::OperatorNew,
        &day,
        Some(&operator),
        Some(&operator),
        lines,
        progress.cutoff_lote,
        boundary,
    )
    .await
}

/// POST /api/print/routes/:route_id/collector/print-new
pub async fn collector_print_new(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<PrintJobResponse>> {
    let actor = super::actor_from_headers(&headers);
    let day = load_route_day(&state, route_id).await?;

    let after = {
        let mut conn = state.pool.acquire().await?;
        db::progress::collector_progress(&mut conn, day.shift_id, &day.route_norm)
            .await?
            .and_then(|p| p.last_closed_lote)
    };

    let lines = {
        let mut conn = state.pool.acquire().await?;
        selector::collector_new(&mut conn, day.shift_id, &day.route_norm, after).await?
    };

    emit_job(
        &state,
        PrintKind::CollectorNew,
        &day,
        None,
        actor.as_deref(),
        lines,
        None,
        after,
    )
    .await
}

/// POST /api/print/jobs/:job_id/reprint: re-emit a prior job's exact
/// line set; counts go up, cursors stay put
pub async fn reprint_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<PrintJobResponse>> {
    let actor = super::actor_from_headers(&headers);

    let (source, lines) = {
        let mut conn = state.pool.acquire().await?;
        let source = db::print_jobs::get(&mut conn, job_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("print job {}", job_id)))?;
        if source.status == "FAILED" {
            return Err(ApiError::ValidationBlocked(
                "cannot reprint a failed job".to_string(),
            ));
        }
        let lines = selector::lines_of_job(&mut conn, job_id).await?;
        (source, lines)
    };

    let day = {
        let mut conn = state.pool.acquire().await?;
        db::route_days::find(&mut conn, source.shift_id, &source.route_norm)
            .await?
            .ok_or_else(|| ApiError::RouteNotFound(source.route_norm.clone()))?
    };

    let operator = lines.iter().find_map(|l| l.operator.clone());
    emit_job(
        &state,
        PrintKind::Reprint,
        &day,
        operator.as_deref(),
        actor.as_deref(),
        lines,
        None,
        None,
    )
    .await
}
