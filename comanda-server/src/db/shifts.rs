//! Shift persistence: the shift rows themselves, the per-slot schedule,
//! per-shift operator qualifications and route collector assignments.

use super::{fmt_ts, parse_ts_opt};
use chrono::{DateTime, Utc};
use comanda_common::Result;
use serde::Serialize;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

/// One warehouse shift; at most one row is ACTIVE at any time
#[derive(Debug, Clone, Serialize)]
pub struct Shift {
    pub id: Uuid,
    pub date: String,
    pub slot: String,
    pub state: String,
    pub started_at: Option<DateTime<Utc>>,
    pub scheduled_end_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub opened_by: Option<String>,
}

/// Per-slot working hours; `end < start` means the slot crosses midnight
#[derive(Debug, Clone)]
pub struct ShiftSchedule {
    pub slot: String,
    pub start_time: String,
    pub end_time: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Qualification {
    pub user_id: String,
    pub functional_code: i64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteCollectorRow {
    pub route_norm: String,
    pub collector_user: String,
}

const SHIFT_COLUMNS: &str =
    "id, date, slot, state, started_at, scheduled_end_at, ended_at, opened_by";

fn row_to_shift(row: sqlx::sqlite::SqliteRow) -> Result<Shift> {
    let id_raw: String = row.get("id");
    Ok(Shift {
        id: Uuid::parse_str(&id_raw)
            .map_err(|e| comanda_common::Error::Internal(format!("shift id: {}", e)))?,
        date: row.get("date"),
        slot: row.get("slot"),
        state: row.get("state"),
        started_at: parse_ts_opt(row.get("started_at"))?,
        scheduled_end_at: parse_ts_opt(row.get("scheduled_end_at"))?,
        ended_at: parse_ts_opt(row.get("ended_at"))?,
        opened_by: row.get("opened_by"),
    })
}

/// The single ACTIVE shift, if any. Callers re-query inside their own
/// transaction; the value is never cached across requests.
pub async fn active_shift(conn: &mut SqliteConnection) -> Result<Option<Shift>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM shifts WHERE state = 'ACTIVE'",
        SHIFT_COLUMNS
    ))
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_shift).transpose()
}

pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Shift>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM shifts WHERE id = ?",
        SHIFT_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_shift).transpose()
}

pub async fn find_by_date_slot(
    conn: &mut SqliteConnection,
    date: &str,
    slot: &str,
) -> Result<Option<Shift>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM shifts WHERE date = ? AND slot = ?",
        SHIFT_COLUMNS
    ))
    .bind(date)
    .bind(slot)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_shift).transpose()
}

/// Most recently closed shift; the carryover source
pub async fn latest_closed(conn: &mut SqliteConnection) -> Result<Option<Shift>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM shifts WHERE state = 'CLOSED' ORDER BY ended_at DESC LIMIT 1",
        SHIFT_COLUMNS
    ))
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_shift).transpose()
}

/// Insert a shift directly in ACTIVE state; the partial unique index
/// rejects a second ACTIVE row
pub async fn insert_active(conn: &mut SqliteConnection, shift: &Shift) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO shifts (id, date, slot, state, started_at, scheduled_end_at, opened_by, created_at)
        VALUES (?, ?, ?, 'ACTIVE', ?, ?, ?, ?)
        "#,
    )
    .bind(shift.id.to_string())
    .bind(&shift.date)
    .bind(&shift.slot)
    .bind(shift.started_at.map(fmt_ts))
    .bind(shift.scheduled_end_at.map(fmt_ts))
    .bind(&shift.opened_by)
    .bind(fmt_ts(Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn close(
    conn: &mut SqliteConnection,
    id: Uuid,
    ended_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE shifts SET state = 'CLOSED', ended_at = ? WHERE id = ?")
        .bind(fmt_ts(ended_at))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn schedule_for(
    conn: &mut SqliteConnection,
    slot: &str,
) -> Result<Option<ShiftSchedule>> {
    let row = sqlx::query(
        "SELECT slot, start_time, end_time, active FROM shift_schedules WHERE slot = ?",
    )
    .bind(slot)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| ShiftSchedule {
        slot: row.get("slot"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        active: row.get::<i64, _>("active") != 0,
    }))
}

pub async fn qualifications(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
) -> Result<Vec<Qualification>> {
    let rows = sqlx::query(
        "SELECT user_id, functional_code, enabled FROM shift_qualifications WHERE shift_id = ? ORDER BY functional_code, user_id",
    )
    .bind(shift_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Qualification {
            user_id: row.get("user_id"),
            functional_code: row.get("functional_code"),
            enabled: row.get::<i64, _>("enabled") != 0,
        })
        .collect())
}

/// Upsert one qualification row; the configuration surface for the
/// per-shift operator pools
pub async fn set_qualification(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    user_id: &str,
    functional_code: i64,
    enabled: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO shift_qualifications (shift_id, user_id, functional_code, enabled)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(shift_id, user_id, functional_code) DO UPDATE SET enabled = excluded.enabled
        "#,
    )
    .bind(shift_id.to_string())
    .bind(user_id)
    .bind(functional_code)
    .bind(enabled as i64)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn collectors(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
) -> Result<Vec<RouteCollectorRow>> {
    let rows = sqlx::query(
        "SELECT route_norm, collector_user FROM route_collectors WHERE shift_id = ? ORDER BY route_norm",
    )
    .bind(shift_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| RouteCollectorRow {
            route_norm: row.get("route_norm"),
            collector_user: row.get("collector_user"),
        })
        .collect())
}

pub async fn set_collector(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    route_norm: &str,
    collector_user: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO route_collectors (shift_id, route_norm, collector_user)
        VALUES (?, ?, ?)
        ON CONFLICT(shift_id, route_norm) DO UPDATE SET collector_user = excluded.collector_user
        "#,
    )
    .bind(shift_id.to_string())
    .bind(route_norm)
    .bind(collector_user)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
