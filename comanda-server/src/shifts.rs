//! Shift lifecycle: open, close, and the auto-closer loop.

use crate::db::shifts::Shift;
use crate::error::{ApiError, ApiResult};
use crate::ingest::IngestService;
use crate::publisher::EventPublisher;
use crate::{carryover, db};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use comanda_common::events::DispatchEvent;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const VALID_SLOTS: [&str; 3] = ["MORNING", "AFTERNOON", "NIGHT"];

/// Compute the scheduled end from the shift date and the slot's end time;
/// a slot whose end does not come after its start crosses midnight.
fn scheduled_end(
    date: NaiveDate,
    start_time: &str,
    end_time: &str,
) -> ApiResult<DateTime<Utc>> {
    let start = NaiveTime::parse_from_str(start_time, "%H:%M")
        .map_err(|e| ApiError::Internal(format!("schedule start time: {}", e)))?;
    let end = NaiveTime::parse_from_str(end_time, "%H:%M")
        .map_err(|e| ApiError::Internal(format!("schedule end time: {}", e)))?;

    let end_dt = if end <= start {
        date.and_time(end) + ChronoDuration::days(1)
    } else {
        date.and_time(end)
    };

    Ok(Utc.from_utc_datetime(&end_dt))
}

/// Open a shift for `(date, slot)`, run carryover from the most recent
/// closed shift, then trigger one immediate mailbox poll. The poll failing
/// is logged and does not block activation.
pub async fn open_shift(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    ingest: Option<&Arc<IngestService>>,
    slot: &str,
    date: &str,
    actor: Option<&str>,
) -> ApiResult<Shift> {
    if !VALID_SLOTS.contains(&slot) {
        return Err(ApiError::BadRequest(format!("unknown slot: {}", slot)));
    }
    let parsed_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date: {}", date)))?;

    let mut tx = pool.begin().await?;

    if db::shifts::active_shift(&mut tx).await?.is_some() {
        return Err(ApiError::ShiftAlreadyActive);
    }

    let schedule = db::shifts::schedule_for(&mut tx, slot)
        .await?
        .filter(|s| s.active)
        .ok_or(ApiError::ScheduleNotFound)?;

    if db::shifts::find_by_date_slot(&mut tx, date, slot)
        .await?
        .is_some()
    {
        return Err(ApiError::DuplicateShift);
    }

    let now = Utc::now();
    let shift = Shift {
        id: Uuid::new_v4(),
        date: date.to_string(),
        slot: slot.to_string(),
        state: "ACTIVE".to_string(),
        started_at: Some(now),
        scheduled_end_at: Some(scheduled_end(
            parsed_date,
            &schedule.start_time,
            &schedule.end_time,
        )?),
        ended_at: None,
        opened_by: actor.map(|a| a.to_string()),
    };

    db::shifts::insert_active(&mut tx, &shift).await?;
    let staged = db::events::append(
        &mut tx,
        &DispatchEvent::ShiftStarted {
            shift_id: shift.id,
            date: shift.date.clone(),
            slot: shift.slot.clone(),
            started_at: now,
            scheduled_end_at: shift.scheduled_end_at.unwrap_or(now),
        },
        actor,
    )
    .await?;

    tx.commit().await?;
    publisher.broadcast_all(vec![staged]);
    info!(shift = %shift.id, slot = %shift.slot, date = %shift.date, "shift opened");

    carryover::carry_over(pool, publisher, &shift).await?;

    if let Some(ingest) = ingest {
        if let Err(e) = ingest.poll_now().await {
            warn!(error = %e, "backlog poll on shift open failed");
        }
    }

    Ok(shift)
}

/// Close the ACTIVE shift. `shift_id`, when given, must name that shift.
pub async fn close_shift(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    shift_id: Option<Uuid>,
    actor: Option<&str>,
) -> ApiResult<Shift> {
    let mut tx = pool.begin().await?;

    let Some(active) = db::shifts::active_shift(&mut tx).await? else {
        return Err(ApiError::NoActiveShift);
    };
    if let Some(requested) = shift_id {
        if requested != active.id {
            return Err(ApiError::NotFound(format!("active shift is not {}", requested)));
        }
    }

    let ended_at = Utc::now();
    db::shifts::close(&mut tx, active.id, ended_at).await?;
    let staged = db::events::append(
        &mut tx,
        &DispatchEvent::ShiftClosed {
            shift_id: active.id,
            ended_at,
        },
        actor,
    )
    .await?;

    tx.commit().await?;
    publisher.broadcast_all(vec![staged]);
    info!(shift = %active.id, "shift closed");

    let mut closed = active;
    closed.state = "CLOSED".to_string();
    closed.ended_at = Some(ended_at);
    Ok(closed)
}

/// Close the ACTIVE shift if it ran past its scheduled end. Returns the
/// shift that was closed, if any.
pub async fn close_overdue(
    pool: &SqlitePool,
    publisher: &EventPublisher,
) -> ApiResult<Option<Shift>> {
    let mut tx = pool.begin().await?;

    let Some(active) = db::shifts::active_shift(&mut tx).await? else {
        return Ok(None);
    };
    let Some(scheduled_end_at) = active.scheduled_end_at else {
        return Ok(None);
    };

    let now = Utc::now();
    if scheduled_end_at > now {
        return Ok(None);
    }

    db::shifts::close(&mut tx, active.id, now).await?;
    let staged = db::events::append(
        &mut tx,
        &DispatchEvent::ShiftClosedAuto {
            shift_id: active.id,
            scheduled_end_at,
            ended_at: now,
        },
        None,
    )
    .await?;

    tx.commit().await?;
    publisher.broadcast_all(vec![staged]);
    info!(shift = %active.id, scheduled = %scheduled_end_at, "shift auto-closed");

    let mut closed = active;
    closed.state = "CLOSED".to_string();
    closed.ended_at = Some(now);
    Ok(Some(closed))
}

/// Background loop closing overdue shifts
pub fn spawn_auto_closer(
    pool: SqlitePool,
    publisher: EventPublisher,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = close_overdue(&pool, &publisher).await {
                        error!(error = %e, "auto-closer tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("auto-closer stopping");
                        break;
                    }
                }
            }
        }
    })
}
