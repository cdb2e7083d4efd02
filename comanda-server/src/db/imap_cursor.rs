//! Persisted ingest cursor, one row per mailbox.
//!
//! The ingest task is the only writer. `last_uid` only moves forward for a
//! given uidvalidity; a uidvalidity change resets it to zero.

use super::{fmt_ts, parse_ts_opt};
use chrono::{DateTime, Utc};
use comanda_common::Result;
use sqlx::{Row, SqliteConnection};

#[derive(Debug, Clone, Default)]
pub struct ImapCursor {
    pub last_uid: i64,
    pub uidvalidity: Option<i64>,
    pub last_poll_at: Option<DateTime<Utc>>,
}

pub async fn get(conn: &mut SqliteConnection, mailbox: &str) -> Result<ImapCursor> {
    let row = sqlx::query(
        "SELECT last_uid, uidvalidity, last_poll_at FROM imap_cursor WHERE mailbox = ?",
    )
    .bind(mailbox)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(ImapCursor {
            last_uid: row.get("last_uid"),
            uidvalidity: row.get("uidvalidity"),
            last_poll_at: parse_ts_opt(row.get("last_poll_at"))?,
        }),
        None => Ok(ImapCursor::default()),
    }
}

pub async fn upsert(
    conn: &mut SqliteConnection,
    mailbox: &str,
    last_uid: i64,
    uidvalidity: Option<i64>,
    last_poll_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO imap_cursor (mailbox, last_uid, uidvalidity, last_poll_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(mailbox) DO UPDATE SET
            last_uid = excluded.last_uid,
            uidvalidity = excluded.uidvalidity,
            last_poll_at = excluded.last_poll_at
        "#,
    )
    .bind(mailbox)
    .bind(last_uid)
    .bind(uidvalidity)
    .bind(fmt_ts(last_poll_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Record a poll that fetched nothing (e.g. no shift is active) without
/// touching the uid cursor
pub async fn touch_poll(
    conn: &mut SqliteConnection,
    mailbox: &str,
    last_poll_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO imap_cursor (mailbox, last_uid, uidvalidity, last_poll_at)
        VALUES (?, 0, NULL, ?)
        ON CONFLICT(mailbox) DO UPDATE SET last_poll_at = excluded.last_poll_at
        "#,
    )
    .bind(mailbox)
    .bind(fmt_ts(last_poll_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}
