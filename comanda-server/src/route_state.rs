//! Route state: the derived visual color and the collector-driven logical
//! status.
//!
//! `next_visual` is the pure transition function; `evaluate_route` applies
//! it inside its own transaction after any change that may have moved the
//! unprinted metric (new lote, print commit, carryover). Transitions on
//! one route serialize on the route_days row.

use crate::db::route_days::{LogicalState, RouteDay, VisualState};
use crate::publisher::EventPublisher;
use crate::{db, error::ApiResult};
use comanda_common::events::DispatchEvent;
use comanda_common::Result;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

/// The visual transition function over `(unprinted, prior visual, logical)`
pub fn next_visual(unprinted: i64, prior: VisualState, logical: LogicalState) -> VisualState {
    if unprinted == 0 {
        VisualState::Green
    } else if prior == VisualState::Green
        || prior == VisualState::Red
        || logical == LogicalState::Collected
    {
        VisualState::Red
    } else {
        VisualState::Blue
    }
}

/// Re-derive the visual state of one route and publish the transition
/// events. A no-op when the route day does not exist yet.
pub async fn evaluate_route(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    shift_id: Uuid,
    route_norm: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let Some(day) = db::route_days::find(&mut tx, shift_id, route_norm).await? else {
        return Ok(());
    };

    let unprinted = db::route_days::unprinted_count(&mut tx, shift_id, route_norm).await?;
    let visual = next_visual(unprinted, day.visual_state, day.logical_state);

    let mut reactivations = day.reactivations_count;
    let mut staged = Vec::new();

    if visual != day.visual_state {
        debug!(
            route = %day.route_norm,
            from = day.visual_state.as_str(),
            to = visual.as_str(),
            unprinted,
            "route visual transition"
        );

        match visual {
            VisualState::Red => {
                // A collected route dragged back out of GREEN by new work
                // counts as a reactivation.
                if day.logical_state == LogicalState::Collected
                    && day.visual_state == VisualState::Green
                {
                    reactivations += 1;
                }
                staged.push(
                    db::events::append(
                        &mut tx,
                        &DispatchEvent::RouteAlertRed {
                            route_day_id: day.id,
                            route_norm: day.route_norm.clone(),
                            unprinted,
                        },
                        None,
                    )
                    .await?,
                );
            }
            VisualState::Green => {
                staged.push(
                    db::events::append(
                        &mut tx,
                        &DispatchEvent::RouteCompleteGreen {
                            route_day_id: day.id,
                            route_norm: day.route_norm.clone(),
                        },
                        None,
                    )
                    .await?,
                );
            }
            VisualState::Blue => {}
        }
    }

    db::route_days::update_states(&mut tx, day.id, visual, day.logical_state, reactivations)
        .await?;

    tx.commit().await?;
    publisher.broadcast_all(staged);

    Ok(())
}

/// Collector action: flip the logical state to COLLECTED and re-derive the
/// visual state (a route collected with pending work goes straight to RED).
pub async fn mark_collected(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    route_day_id: Uuid,
    actor: Option<&str>,
) -> ApiResult<RouteDay> {
    let mut tx = pool.begin().await?;

    let Some(day) = db::route_days::find_by_id(&mut tx, route_day_id).await? else {
        return Err(crate::error::ApiError::RouteNotFound(route_day_id.to_string()));
    };

    let mut staged = Vec::new();
    if day.logical_state != LogicalState::Collected {
        db::route_days::update_states(
            &mut tx,
            day.id,
            day.visual_state,
            LogicalState::Collected,
            day.reactivations_count,
        )
        .await?;
        staged.push(
            db::events::append(
                &mut tx,
                &DispatchEvent::RouteCollected {
                    route_day_id: day.id,
                    route_norm: day.route_norm.clone(),
                },
                actor,
            )
            .await?,
        );
    }

    tx.commit().await?;
    publisher.broadcast_all(staged);

    evaluate_route(pool, publisher, day.shift_id, &day.route_norm).await?;

    let mut conn = pool.acquire().await?;
    let updated = db::route_days::find_by_id(&mut conn, route_day_id)
        .await?
        .ok_or_else(|| crate::error::ApiError::RouteNotFound(route_day_id.to_string()))?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_unprinted_is_green() {
        assert_eq!(
            next_visual(0, VisualState::Blue, LogicalState::Active),
            VisualState::Green
        );
        assert_eq!(
            next_visual(0, VisualState::Red, LogicalState::Collected),
            VisualState::Green
        );
    }

    #[test]
    fn test_pending_from_green_goes_red() {
        assert_eq!(
            next_visual(3, VisualState::Green, LogicalState::Active),
            VisualState::Red
        );
    }

    #[test]
    fn test_pending_while_collected_goes_red() {
        assert_eq!(
            next_visual(1, VisualState::Blue, LogicalState::Collected),
            VisualState::Red
        );
    }

    #[test]
    fn test_red_stays_red_while_pending() {
        assert_eq!(
            next_visual(1, VisualState::Red, LogicalState::Active),
            VisualState::Red
        );
    }

    #[test]
    fn test_pending_from_blue_stays_blue() {
        assert_eq!(
            next_visual(5, VisualState::Blue, LogicalState::Active),
            VisualState::Blue
        );
    }
}
