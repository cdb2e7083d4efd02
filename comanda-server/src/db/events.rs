//! Append-only event log.
//!
//! Rows are never updated; the AUTOINCREMENT id is the total order the SSE
//! stream replays in. Appends happen on the caller's connection so a
//! pipeline transaction persists its events atomically with its writes.

use super::{fmt_ts, parse_ts};
use chrono::{DateTime, Utc};
use comanda_common::events::{DispatchEvent, StoredEvent};
use comanda_common::{Error, Result};
use sqlx::{Row, SqliteConnection};

/// Reference point for replay: a log id or a timestamp
#[derive(Debug, Clone, Copy)]
pub enum EventRef {
    Id(i64),
    Ts(DateTime<Utc>),
}

/// Append one event; the log assigns id and timestamp
pub async fn append(
    conn: &mut SqliteConnection,
    event: &DispatchEvent,
    actor: Option<&str>,
) -> Result<StoredEvent> {
    let ts = Utc::now();
    let (entity_type, entity_id) = event.entity();
    let payload = serde_json::to_value(event)
        .map_err(|e| Error::Internal(format!("event serialization: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO events (ts, actor, event_type, entity_type, entity_id, payload)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(fmt_ts(ts))
    .bind(actor)
    .bind(event.event_type())
    .bind(entity_type)
    .bind(&entity_id)
    .bind(payload.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(StoredEvent {
        id: result.last_insert_rowid(),
        ts,
        actor: actor.map(|a| a.to_string()),
        event_type: event.event_type().to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        payload,
    })
}

/// Events strictly after the reference, ascending, capped
pub async fn events_after(
    conn: &mut SqliteConnection,
    after: Option<EventRef>,
    limit: i64,
) -> Result<Vec<StoredEvent>> {
    let rows = match after {
        Some(EventRef::Id(id)) => {
            sqlx::query("SELECT id, ts, actor, event_type, entity_type, entity_id, payload FROM events WHERE id > ? ORDER BY id ASC LIMIT ?")
                .bind(id)
                .bind(limit)
                .fetch_all(&mut *conn)
                .await?
        }
        Some(EventRef::Ts(ts)) => {
            sqlx::query("SELECT id, ts, actor, event_type, entity_type, entity_id, payload FROM events WHERE ts > ? ORDER BY id ASC LIMIT ?")
                .bind(fmt_ts(ts))
                .bind(limit)
                .fetch_all(&mut *conn)
                .await?
        }
        None => {
            sqlx::query("SELECT id, ts, actor, event_type, entity_type, entity_id, payload FROM events ORDER BY id ASC LIMIT ?")
                .bind(limit)
                .fetch_all(&mut *conn)
                .await?
        }
    };

    rows.into_iter().map(row_to_stored).collect()
}

/// Filters for the paged history endpoint
#[derive(Debug, Default, Clone)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// One page of history, newest first, plus the unfiltered total
pub async fn query_page(
    conn: &mut SqliteConnection,
    filter: &EventFilter,
    limit: i64,
    offset: i64,
) -> Result<(Vec<StoredEvent>, i64)> {
    let mut where_sql = String::from("1 = 1");
    if filter.event_type.is_some() {
        where_sql.push_str(" AND event_type = ?");
    }
    if filter.entity_type.is_some() {
        where_sql.push_str(" AND entity_type = ?");
    }
    if filter.entity_id.is_some() {
        where_sql.push_str(" AND entity_id = ?");
    }
    if filter.since.is_some() {
        where_sql.push_str(" AND ts > ?");
    }

    let count_sql = format!("SELECT COUNT(*) FROM events WHERE {}", where_sql);
    let page_sql = format!(
        "SELECT id, ts, actor, event_type, entity_type, entity_id, payload FROM events WHERE {} ORDER BY id DESC LIMIT ? OFFSET ?",
        where_sql
    );

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    let mut page_query = sqlx::query(&page_sql);
    if let Some(v) = &filter.event_type {
        count_query = count_query.bind(v.clone());
        page_query = page_query.bind(v.clone());
    }
    if let Some(v) = &filter.entity_type {
        count_query = count_query.bind(v.clone());
        page_query = page_query.bind(v.clone());
    }
    if let Some(v) = &filter.entity_id {
        count_query = count_query.bind(v.clone());
        page_query = page_query.bind(v.clone());
    }
    if let Some(v) = &filter.since {
        let ts = fmt_ts(*v);
        count_query = count_query.bind(ts.clone());
        page_query = page_query.bind(ts);
    }

    let total: i64 = count_query.fetch_one(&mut *conn).await?;
    let rows = page_query
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await?;

    let events = rows
        .into_iter()
        .map(row_to_stored)
        .collect::<Result<Vec<_>>>()?;
    Ok((events, total))
}

fn row_to_stored(row: sqlx::sqlite::SqliteRow) -> Result<StoredEvent> {
    let ts_raw: String = row.get("ts");
    let payload_raw: String = row.get("payload");
    let payload = serde_json::from_str(&payload_raw)
        .map_err(|e| Error::Internal(format!("event payload: {}", e)))?;

    Ok(StoredEvent {
        id: row.get("id"),
        ts: parse_ts(&ts_raw)?,
        actor: row.get("actor"),
        event_type: row.get("event_type"),
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        payload,
    })
}
