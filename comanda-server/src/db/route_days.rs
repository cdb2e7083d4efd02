//! RouteDay persistence and the derived unprinted metric.

use super::{fmt_ts, parse_ts_opt};
use chrono::{DateTime, Utc};
use comanda_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

/// Visual wall-display color of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisualState {
    Blue,
    Green,
    Red,
}

impl VisualState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualState::Blue => "BLUE",
            VisualState::Green => "GREEN",
            VisualState::Red => "RED",
        }
    }

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "BLUE" => Ok(VisualState::Blue),
            "GREEN" => Ok(VisualState::Green),
            "RED" => Ok(VisualState::Red),
            other => Err(comanda_common::Error::Internal(format!(
                "unknown visual state {:?}",
                other
            ))),
        }
    }
}

/// Collector-driven logical status of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalState {
    Active,
    Collected,
}

impl LogicalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalState::Active => "ACTIVE",
            LogicalState::Collected => "COLLECTED",
        }
    }

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "ACTIVE" => Ok(LogicalState::Active),
            "COLLECTED" => Ok(LogicalState::Collected),
            other => Err(comanda_common::Error::Internal(format!(
                "unknown logical state {:?}",
                other
            ))),
        }
    }
}

/// One route as observed within one shift; created lazily by the first
/// lote naming the route
#[derive(Debug, Clone)]
pub struct RouteDay {
    pub id: Uuid,
    pub shift_id: Uuid,
    pub route_norm: String,
    pub visual_state: VisualState,
    pub logical_state: LogicalState,
    pub reactivations_count: i64,
    pub last_event_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str =
    "id, shift_id, route_norm, visual_state, logical_state, reactivations_count, last_event_at";

fn row_to_route_day(row: sqlx::sqlite::SqliteRow) -> Result<RouteDay> {
    let id_raw: String = row.get("id");
    let shift_raw: String = row.get("shift_id");
    let visual_raw: String = row.get("visual_state");
    let logical_raw: String = row.get("logical_state");

    Ok(RouteDay {
        id: Uuid::parse_str(&id_raw)
            .map_err(|e| comanda_common::Error::Internal(format!("route day id: {}", e)))?,
        shift_id: Uuid::parse_str(&shift_raw)
            .map_err(|e| comanda_common::Error::Internal(format!("route day shift: {}", e)))?,
        route_norm: row.get("route_norm"),
        visual_state: VisualState::from_str(&visual_raw)?,
        logical_state: LogicalState::from_str(&logical_raw)?,
        reactivations_count: row.get("reactivations_count"),
        last_event_at: parse_ts_opt(row.get("last_event_at"))?,
    })
}

pub async fn find(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    route_norm: &str,
) -> Result<Option<RouteDay>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM route_days WHERE shift_id = ? AND route_norm = ?",
        COLUMNS
    ))
    .bind(shift_id.to_string())
    .bind(route_norm)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_route_day).transpose()
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<RouteDay>> {
    let row = sqlx::query(&format!("SELECT {} FROM route_days WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(row_to_route_day).transpose()
}

/// Find or lazily create the route day with initial `{BLUE, ACTIVE, 0}`
pub async fn find_or_create(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    route_norm: &str,
) -> Result<RouteDay> {
    if let Some(existing) = find(&mut *conn, shift_id, route_norm).await? {
        return Ok(existing);
    }

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO route_days (id, shift_id, route_norm, visual_state, logical_state,
                                reactivations_count, created_at)
        VALUES (?, ?, ?, 'BLUE', 'ACTIVE', 0, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(shift_id.to_string())
    .bind(route_norm)
    .bind(fmt_ts(Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(RouteDay {
        id,
        shift_id,
        route_norm: route_norm.to_string(),
        visual_state: VisualState::Blue,
        logical_state: LogicalState::Active,
        reactivations_count: 0,
        last_event_at: None,
    })
}

pub async fn update_states(
    conn: &mut SqliteConnection,
    id: Uuid,
    visual: VisualState,
    logical: LogicalState,
    reactivations_count: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE route_days SET visual_state = ?, logical_state = ?, reactivations_count = ?, last_event_at = ? WHERE id = ?",
    )
    .bind(visual.as_str())
    .bind(logical.as_str())
    .bind(reactivations_count)
    .bind(fmt_ts(Utc::now()))
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn list_for_shift(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
) -> Result<Vec<RouteDay>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM route_days WHERE shift_id = ? ORDER BY route_norm ASC",
        COLUMNS
    ))
    .bind(shift_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(row_to_route_day).collect()
}

/// Count of unprinted lines across the route's OK lotes in this shift;
/// the input of the visual transition function
pub async fn unprinted_count(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    route_norm: &str,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM lines li
        JOIN client_orders co ON li.client_order_id = co.id
        JOIN lotes l ON co.lote_id = l.id
        WHERE l.shift_id = ? AND l.route_norm = ? AND l.parse_status = 'OK'
          AND li.printed_at IS NULL
        "#,
    )
    .bind(shift_id.to_string())
    .bind(route_norm)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

/// Route summary aggregates for the wall-display listing
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub route_id: Uuid,
    pub route_name: String,
    pub visual_state: VisualState,
    pub logical_state: LogicalState,
    pub unprinted: i64,
    pub total_lines: i64,
    pub total_clients: i64,
    pub lotes_count: i64,
}

pub async fn summaries_for_shift(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
) -> Result<Vec<RouteSummary>> {
    let days = list_for_shift(&mut *conn, shift_id).await?;
    let mut summaries = Vec::with_capacity(days.len());

    for day in days {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(li.id) AS total_lines,
                COUNT(DISTINCT co.id) AS total_clients,
                COUNT(DISTINCT l.id) AS lotes_count,
                COALESCE(SUM(CASE WHEN li.printed_at IS NULL THEN 1 ELSE 0 END), 0) AS unprinted
            FROM lotes l
            LEFT JOIN client_orders co ON co.lote_id = l.id
            LEFT JOIN lines li ON li.client_order_id = co.id
            WHERE l.shift_id = ? AND l.route_norm = ? AND l.parse_status = 'OK'
            "#,
        )
        .bind(shift_id.to_string())
        .bind(&day.route_norm)
        .fetch_one(&mut *conn)
        .await?;

        summaries.push(RouteSummary {
            route_id: day.id,
            route_name: day.route_norm.clone(),
            visual_state: day.visual_state,
            logical_state: day.logical_state,
            unprinted: row.get("unprinted"),
            total_lines: row.get("total_lines"),
            total_clients: row.get("total_clients"),
            lotes_count: row.get("lotes_count"),
        });
    }

    Ok(summaries)
}
