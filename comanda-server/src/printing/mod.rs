//! Printing: enter/cutoff semantics, line selection, job commit and the
//! renderer seam.

pub mod jobs;
pub mod render;
pub mod selector;

use crate::db::route_days::LogicalState;
use crate::error::{ApiError, ApiResult};
use crate::publisher::EventPublisher;
use crate::{db, route_state};
use comanda_common::events::DispatchEvent;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

/// The four print-job kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintKind {
    OperatorInitial,
    OperatorNew,
    CollectorNew,
    Reprint,
}

impl PrintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrintKind::OperatorInitial => "OPERATOR_INITIAL",
            PrintKind::OperatorNew => "OPERATOR_NEW",
            PrintKind::CollectorNew => "COLLECTOR_NEW",
            PrintKind::Reprint => "REPRINT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnterOutcome {
    pub cutoff_lote: Option<Uuid>,
    pub entered: bool,
}

/// First "enter route" for `(shift, operator, route)`: snapshot the cutoff
/// lote and create the progress row. Re-entering is a no-op that returns
/// the existing cutoff; the snapshot never advances this way. Entering a
/// COLLECTED route reactivates it.
pub async fn enter_route(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    route_day_id: Uuid,
    operator: &str,
) -> ApiResult<EnterOutcome> {
    let mut tx = pool.begin().await?;

    let Some(day) = db::route_days::find_by_id(&mut tx, route_day_id).await? else {
        return Err(ApiError::RouteNotFound(route_day_id.to_string()));
    };

    if let Some(existing) =
        db::progress::operator_progress(&mut tx, day.shift_id, operator, &day.route_norm).await?
    {
        return Ok(EnterOutcome {
            cutoff_lote: existing.cutoff_lote,
            entered: false,
        });
    }

    let cutoff = db::lotes::latest_ok_lote(&mut tx, day.shift_id, &day.route_norm).await?;
    db::progress::insert_operator_progress(
        &mut tx,
        day.shift_id,
        operator,
        &day.route_norm,
        cutoff,
    )
    .await?;

    if day.logical_state == LogicalState::Collected {
        db::route_days::update_states(
            &mut tx,
            day.id,
            day.visual_state,
            LogicalState::Active,
            day.reactivations_count,
        )
        .await?;
    }

    let staged = db::events::append(
        &mut tx,
        &DispatchEvent::OperatorEnteredRoute {
            route_day_id: day.id,
            route_norm: day.route_norm.clone(),
            operator: operator.to_string(),
            cutoff_lote: cutoff,
        },
        Some(operator),
    )
    .await?;

    tx.commit().await?;
    publisher.broadcast_all(vec![staged]);
    info!(route = %day.route_norm, operator, cutoff = ?cutoff, "operator entered route");

    // The logical flip may change the derived visual state.
    if day.logical_state == LogicalState::Collected {
        route_state::evaluate_route(pool, publisher, day.shift_id, &day.route_norm).await?;
    }

    Ok(EnterOutcome {
        cutoff_lote: cutoff,
        entered: true,
    })
}
