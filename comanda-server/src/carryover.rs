//! Carryover of unprinted work into a newly opened shift.
//!
//! Every lote of the previous shift that still owns unprinted lines is
//! duplicated into the new shift as a fresh OK lote (no IMAP identity,
//! catalog versions copied). Operator bindings travel with the lines even
//! if the operator is not qualified in the new shift; only brand-new
//! emails are assigned under the new pool.

use crate::db::shifts::Shift;
use crate::publisher::EventPublisher;
use crate::{db, route_state};
use comanda_common::events::DispatchEvent;
use comanda_common::Result;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct CarryoverSummary {
    pub lotes: usize,
    pub lines: usize,
}

/// Copy all unprinted work of the most recent CLOSED shift into
/// `new_shift`. Returns zero counts when there is no previous shift or
/// nothing is pending.
pub async fn carry_over(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    new_shift: &Shift,
) -> Result<CarryoverSummary> {
    let mut summary = CarryoverSummary::default();
    let mut touched_routes: BTreeSet<String> = BTreeSet::new();

    let prev = {
        let mut conn = pool.acquire().await?;
        db::shifts::latest_closed(&mut conn).await?
    };
    let Some(prev) = prev else {
        return Ok(summary);
    };

    let sources = {
        let mut conn = pool.acquire().await?;
        db::lotes::lotes_with_unprinted(&mut conn, prev.id).await?
    };

    for source in sources {
        let Some(route_norm) = source.route_norm.clone() else {
            // An OK lote always has a bound route; skip defensively.
            continue;
        };

        let mut tx = pool.begin().await?;

        db::route_days::find_or_create(&mut tx, new_shift.id, &route_norm).await?;
        let new_lote_id = db::lotes::insert_carried(&mut tx, new_shift.id, &source).await?;

        let mut copied_lines = 0usize;
        let clients = db::lotes::client_orders_with_unprinted(&mut tx, source.id).await?;
        for (client_id, name_raw, affinity_key, observations) in clients {
            let new_client_id = db::lotes::insert_client_order(
                &mut tx,
                new_lote_id,
                &name_raw,
                &affinity_key,
                observations.as_deref(),
            )
            .await?;

            let lines = db::lotes::unprinted_lines_of_client(&mut tx, client_id).await?;
            for line in lines {
                let mut copy = line;
                copy.client_order_id = new_client_id;
                db::lotes::insert_line(&mut tx, &copy).await?;
                copied_lines += 1;
            }
        }

        let staged = db::events::append(
            &mut tx,
            &DispatchEvent::LoteCarriedOver {
                source_lote_id: source.id,
                new_lote_id,
                lines: copied_lines,
            },
            None,
        )
        .await?;

        tx.commit().await?;
        publisher.broadcast_all(vec![staged]);

        summary.lotes += 1;
        summary.lines += copied_lines;
        touched_routes.insert(route_norm);
    }

    for route_norm in &touched_routes {
        route_state::evaluate_route(pool, publisher, new_shift.id, route_norm).await?;
    }

    if summary.lotes > 0 {
        info!(
            from = %prev.id,
            to = %new_shift.id,
            lotes = summary.lotes,
            lines = summary.lines,
            "carryover complete"
        );
    }

    Ok(summary)
}
