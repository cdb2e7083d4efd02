//! Print-progress bookkeeping: per-(shift, operator, route) cutoff and
//! last-printed cursors, per-(shift, route) collector cursor.

use super::{fmt_ts, parse_ts, parse_ts_opt};
use chrono::{DateTime, Utc};
use comanda_common::Result;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OperatorProgress {
    pub entered_at: DateTime<Utc>,
    pub cutoff_lote: Option<Uuid>,
    pub last_printed_lote: Option<Uuid>,
    pub last_printed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CollectorProgress {
    pub last_closed_lote: Option<Uuid>,
    pub last_closed_at: Option<DateTime<Utc>>,
}

fn parse_uuid_opt(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| comanda_common::Error::Internal(format!("progress lote id: {}", e)))
    })
    .transpose()
}

pub async fn operator_progress(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    operator: &str,
    route_norm: &str,
) -> Result<Option<OperatorProgress>> {
    let row = sqlx::query(
        r#"
        SELECT entered_at, cutoff_lote, last_printed_lote, last_printed_at
        FROM operator_route_progress
        WHERE shift_id = ? AND operator = ? AND route_norm = ?
        "#,
    )
    .bind(shift_id.to_string())
    .bind(operator)
    .bind(route_norm)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| {
        let entered_raw: String = row.get("entered_at");
        Ok(OperatorProgress {
            entered_at: parse_ts(&entered_raw)?,
            cutoff_lote: parse_uuid_opt(row.get("cutoff_lote"))?,
            last_printed_lote: parse_uuid_opt(row.get("last_printed_lote"))?,
            last_printed_at: parse_ts_opt(row.get("last_printed_at"))?,
        })
    })
    .transpose()
}

/// Create the first-enter row with its cutoff snapshot. The cutoff never
/// advances by re-entering; callers check for an existing row first.
pub async fn insert_operator_progress(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    operator: &str,
    route_norm: &str,
    cutoff_lote: Option<Uuid>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO operator_route_progress (shift_id, operator, route_norm, entered_at, cutoff_lote)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(shift_id.to_string())
    .bind(operator)
    .bind(route_norm)
    .bind(fmt_ts(Utc::now()))
    .bind(cutoff_lote.map(|id| id.to_string()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn advance_operator_cursor(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    operator: &str,
    route_norm: &str,
    last_printed_lote: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE operator_route_progress
        SET last_printed_lote = ?, last_printed_at = ?
        WHERE shift_id = ? AND operator = ? AND route_norm = ?
        "#,
    )
    .bind(last_printed_lote.to_string())
    .bind(fmt_ts(Utc::now()))
    .bind(shift_id.to_string())
    .bind(operator)
    .bind(route_norm)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn collector_progress(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    route_norm: &str,
) -> Result<Option<CollectorProgress>> {
    let row = sqlx::query(
        "SELECT last_closed_lote, last_closed_at FROM collector_route_progress WHERE shift_id = ? AND route_norm = ?",
    )
    .bind(shift_id.to_string())
    .bind(route_norm)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| {
        Ok(CollectorProgress {
            last_closed_lote: parse_uuid_opt(row.get("last_closed_lote"))?,
            last_closed_at: parse_ts_opt(row.get("last_closed_at"))?,
        })
    })
    .transpose()
}

/// Upsert the collector cursor; the row is created lazily on the first
/// collector print of the route
pub async fn advance_collector_cursor(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    route_norm: &str,
    last_closed_lote: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO collector_route_progress (shift_id, route_norm, last_closed_lote, last_closed_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(shift_id, route_norm) DO UPDATE SET
            last_closed_lote = excluded.last_closed_lote,
            last_closed_at = excluded.last_closed_at
        "#,
    )
    .bind(shift_id.to_string())
    .bind(route_norm)
    .bind(last_closed_lote.to_string())
    .bind(fmt_ts(Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}
