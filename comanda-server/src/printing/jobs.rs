//! Print-job commit: job row, items, line stamping, cursor advance, route
//! re-evaluation, all in one transaction (except the post-commit route
//! step).

use super::selector::PrintLine;
use super::PrintKind;
use crate::error::{ApiError, ApiResult};
use crate::publisher::EventPublisher;
use crate::{db, route_state};
use comanda_common::events::DispatchEvent;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

/// Inputs of one committed print job
#[derive(Debug)]
pub struct PrintCommit<'a> {
    pub kind: PrintKind,
    pub shift_id: Uuid,
    pub route_norm: &'a str,
    pub actor: Option<&'a str>,
    /// Operator whose cursor advances; required for the operator kinds
    pub operator: Option<&'a str>,
    pub lines: &'a [PrintLine],
    pub pdf_ref: &'a str,
    pub cutoff_lote: Option<Uuid>,
    pub from_lote: Option<Uuid>,
}

/// Commit a successful print: insert the job and its items, stamp every
/// line, advance the relevant cursor to the maximum printed lote, publish
/// `PRINT_EMITTED`, then re-derive the route state.
///
/// The caller allocates `job_id` up front so the stored blob can carry it.
pub async fn commit_print_job(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    job_id: Uuid,
    commit: PrintCommit<'_>,
) -> ApiResult<Uuid> {
    if commit.lines.is_empty() {
        return Err(ApiError::NothingToPrint);
    }

    // The selector returns lines in lote order; the last one carries the
    // maximum lote.
    let to_lote = commit.lines.last().map(|l| l.lote_id);

    let mut tx = pool.begin().await?;

    db::print_jobs::insert(
        &mut tx,
        job_id,
        commit.shift_id,
        commit.route_norm,
        commit.actor,
        commit.kind.as_str(),
        "PDF_READY",
        Some(commit.pdf_ref),
        None,
        commit.cutoff_lote,
        commit.from_lote,
        to_lote,
    )
    .await?;

    for line in commit.lines {
        db::print_jobs::insert_item(&mut tx, job_id, line.line_id).await?;
        db::print_jobs::stamp_line(&mut tx, line.line_id).await?;
    }

    // Reprints never advance cursors.
    if commit.kind != PrintKind::Reprint {
        if let Some(to_lote) = to_lote {
            match commit.kind {
                PrintKind::OperatorInitial | PrintKind::OperatorNew => {
                    let operator = commit
                        .operator
                        .ok_or_else(|| ApiError::Internal("operator print without operator".to_string()))?;
                    db::progress::advance_operator_cursor(
                        &mut tx,
                        commit.shift_id,
                        operator,
                        commit.route_norm,
                        to_lote,
                    )
                    .await?;
                }
                PrintKind::CollectorNew => {
                    db::progress::advance_collector_cursor(
                        &mut tx,
                        commit.shift_id,
                        commit.route_norm,
                        to_lote,
                    )
                    .await?;
                }
                PrintKind::Reprint => unreachable!(),
            }
        }
    }

    let staged = db::events::append(
        &mut tx,
        &DispatchEvent::PrintEmitted {
            job_id,
            route_norm: commit.route_norm.to_string(),
            kind: commit.kind.as_str().to_string(),
            lines: commit.lines.len(),
        },
        commit.actor,
    )
    .await?;

    tx.commit().await?;
    publisher.broadcast_all(vec![staged]);
    info!(
        job = %job_id,
        kind = commit.kind.as_str(),
        route = commit.route_norm,
        lines = commit.lines.len(),
        "print job committed"
    );

    // Stamping may have emptied the unprinted set.
    if commit.kind != PrintKind::Reprint {
        route_state::evaluate_route(pool, publisher, commit.shift_id, commit.route_norm).await?;
    }

    Ok(job_id)
}

/// Record a job whose rendering failed. Nothing is stamped, no cursor
/// moves, route state stays untouched.
pub async fn record_failed_job(
    pool: &SqlitePool,
    kind: PrintKind,
    shift_id: Uuid,
    route_norm: &str,
    actor: Option<&str>,
    error_text: &str,
) -> ApiResult<Uuid> {
    let job_id = Uuid::new_v4();
    let mut conn = pool.acquire().await?;

    db::print_jobs::insert(
        &mut conn,
        job_id,
        shift_id,
        route_norm,
        actor,
        kind.as_str(),
        "FAILED",
        None,
        Some(error_text),
        None,
        None,
        None,
    )
    .await?;

    Ok(job_id)
}
