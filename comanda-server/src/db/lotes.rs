//! Lote persistence: the raw email batches, their client orders and lines.
//!
//! The `(imap_uidvalidity, imap_uid)` unique index is the idempotency
//! anchor of the whole ingest; inserts go through `ON CONFLICT DO NOTHING`
//! and report whether a row was actually created. Carried-over lotes have
//! no IMAP identity.

use super::{fmt_ts, parse_ts};
use chrono::{DateTime, Utc};
use comanda_common::Result;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Lote {
    pub id: Uuid,
    pub imap_uidvalidity: Option<i64>,
    pub imap_uid: Option<i64>,
    pub received_at: DateTime<Utc>,
    pub subject_raw: String,
    pub body_raw: String,
    pub parse_status: String,
    pub parse_error: Option<String>,
    pub shift_id: Uuid,
    pub route_norm: Option<String>,
    pub products_catalog_version: Option<i64>,
    pub routes_catalog_version: Option<i64>,
    pub carried_over: bool,
    pub created_at: DateTime<Utc>,
}

const LOTE_COLUMNS: &str = "id, imap_uidvalidity, imap_uid, received_at, subject_raw, body_raw, \
     parse_status, parse_error, shift_id, route_norm, products_catalog_version, \
     routes_catalog_version, carried_over, created_at";

fn row_to_lote(row: sqlx::sqlite::SqliteRow) -> Result<Lote> {
    let id_raw: String = row.get("id");
    let shift_raw: String = row.get("shift_id");
    let received_raw: String = row.get("received_at");
    let created_raw: String = row.get("created_at");

    Ok(Lote {
        id: Uuid::parse_str(&id_raw)
            .map_err(|e| comanda_common::Error::Internal(format!("lote id: {}", e)))?,
        imap_uidvalidity: row.get("imap_uidvalidity"),
        imap_uid: row.get("imap_uid"),
        received_at: parse_ts(&received_raw)?,
        subject_raw: row.get("subject_raw"),
        body_raw: row.get("body_raw"),
        parse_status: row.get("parse_status"),
        parse_error: row.get("parse_error"),
        shift_id: Uuid::parse_str(&shift_raw)
            .map_err(|e| comanda_common::Error::Internal(format!("lote shift id: {}", e)))?,
        route_norm: row.get("route_norm"),
        products_catalog_version: row.get("products_catalog_version"),
        routes_catalog_version: row.get("routes_catalog_version"),
        carried_over: row.get::<i64, _>("carried_over") != 0,
        created_at: parse_ts(&created_raw)?,
    })
}

pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Lote>> {
    let row = sqlx::query(&format!("SELECT {} FROM lotes WHERE id = ?", LOTE_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(row_to_lote).transpose()
}

/// Insert a raw lote from the mailbox. Returns `None` when the
/// `(uidvalidity, uid)` pair has already been ingested.
pub async fn insert_from_imap(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    uidvalidity: u32,
    uid: u32,
    received_at: DateTime<Utc>,
    subject_raw: &str,
    body_raw: &str,
) -> Result<Option<Uuid>> {
    let id = Uuid::new_v4();
    let result = sqlx::query(
        r#"
        INSERT INTO lotes (id, imap_uidvalidity, imap_uid, received_at, subject_raw, body_raw,
                           parse_status, shift_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 'PENDING', ?, ?)
        ON CONFLICT(imap_uidvalidity, imap_uid) DO NOTHING
        "#,
    )
    .bind(id.to_string())
    .bind(uidvalidity as i64)
    .bind(uid as i64)
    .bind(fmt_ts(received_at))
    .bind(subject_raw)
    .bind(body_raw)
    .bind(shift_id.to_string())
    .bind(fmt_ts(Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok((result.rows_affected() > 0).then_some(id))
}

/// Insert an ERROR_PARSE lote for a message whose extraction failed, so
/// the cursor can advance past it. Idempotent on the IMAP identity.
pub async fn insert_error_lote(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    uidvalidity: u32,
    uid: u32,
    error: &str,
) -> Result<Option<Uuid>> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO lotes (id, imap_uidvalidity, imap_uid, received_at, parse_status, parse_error,
                           shift_id, created_at)
        VALUES (?, ?, ?, ?, 'ERROR_PARSE', ?, ?, ?)
        ON CONFLICT(imap_uidvalidity, imap_uid) DO NOTHING
        "#,
    )
    .bind(id.to_string())
    .bind(uidvalidity as i64)
    .bind(uid as i64)
    .bind(fmt_ts(now))
    .bind(error)
    .bind(shift_id.to_string())
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await?;

    Ok((result.rows_affected() > 0).then_some(id))
}

/// Insert a carried-over lote: already OK, no IMAP identity, catalog
/// versions copied from the source lote
pub async fn insert_carried(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    source: &Lote,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO lotes (id, received_at, subject_raw, body_raw, parse_status, shift_id,
                           route_norm, products_catalog_version, routes_catalog_version,
                           carried_over, created_at)
        VALUES (?, ?, ?, ?, 'OK', ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(fmt_ts(source.received_at))
    .bind(&source.subject_raw)
    .bind(&source.body_raw)
    .bind(shift_id.to_string())
    .bind(&source.route_norm)
    .bind(source.products_catalog_version)
    .bind(source.routes_catalog_version)
    .bind(fmt_ts(Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    parse_status: &str,
    parse_error: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE lotes SET parse_status = ?, parse_error = ? WHERE id = ?")
        .bind(parse_status)
        .bind(parse_error)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn bind_route(conn: &mut SqliteConnection, id: Uuid, route_norm: &str) -> Result<()> {
    sqlx::query("UPDATE lotes SET route_norm = ? WHERE id = ?")
        .bind(route_norm)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn bind_catalogs(
    conn: &mut SqliteConnection,
    id: Uuid,
    products_version: i64,
    routes_version: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE lotes SET products_catalog_version = ?, routes_catalog_version = ? WHERE id = ?",
    )
    .bind(products_version)
    .bind(routes_version)
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Latest OK lote of a route by the lote ordering `(created_at, id)`;
/// the cutoff snapshot taken when an operator first enters
pub async fn latest_ok_lote(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    route_norm: &str,
) -> Result<Option<Uuid>> {
    let id: Option<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM lotes
        WHERE shift_id = ? AND route_norm = ? AND parse_status = 'OK'
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(shift_id.to_string())
    .bind(route_norm)
    .fetch_optional(&mut *conn)
    .await?;

    id.map(|raw| {
        Uuid::parse_str(&raw)
            .map_err(|e| comanda_common::Error::Internal(format!("lote id: {}", e)))
    })
    .transpose()
}

/// OK lotes of a shift that still have at least one unprinted line,
/// in lote order; the carryover working set
pub async fn lotes_with_unprinted(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
) -> Result<Vec<Lote>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM lotes l
        WHERE l.shift_id = ? AND l.parse_status = 'OK'
          AND EXISTS (
              SELECT 1 FROM lines li
              JOIN client_orders co ON li.client_order_id = co.id
              WHERE co.lote_id = l.id AND li.printed_at IS NULL
          )
        ORDER BY l.created_at ASC, l.id ASC
        "#,
        LOTE_COLUMNS
    ))
    .bind(shift_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(row_to_lote).collect()
}

pub async fn insert_client_order(
    conn: &mut SqliteConnection,
    lote_id: Uuid,
    name_raw: &str,
    affinity_key: &str,
    observations: Option<&str>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO client_orders (id, lote_id, name_raw, affinity_key, observations, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(lote_id.to_string())
    .bind(name_raw)
    .bind(affinity_key)
    .bind(observations)
    .bind(fmt_ts(Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Fields of a line to insert; assignment data filled by the pipeline
#[derive(Debug, Clone)]
pub struct NewLine {
    pub client_order_id: Uuid,
    pub seq_in_client: i64,
    pub quantity: f64,
    pub unit_raw: String,
    pub product_raw: String,
    pub product_norm: String,
    pub price: Option<f64>,
    pub match_method: Option<String>,
    pub match_score: Option<f64>,
    pub family: i64,
    pub functional_code: i64,
    pub operator: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
}

pub async fn insert_line(conn: &mut SqliteConnection, line: &NewLine) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO lines (id, client_order_id, seq_in_client, quantity, unit_raw, product_raw,
                           product_norm, price, match_method, match_score, family,
                           functional_code, operator, assigned_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(line.client_order_id.to_string())
    .bind(line.seq_in_client)
    .bind(line.quantity)
    .bind(&line.unit_raw)
    .bind(&line.product_raw)
    .bind(&line.product_norm)
    .bind(line.price)
    .bind(&line.match_method)
    .bind(line.match_score)
    .bind(line.family)
    .bind(line.functional_code)
    .bind(&line.operator)
    .bind(line.assigned_at.map(fmt_ts))
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Client orders of a lote that still own unprinted lines, in order
pub async fn client_orders_with_unprinted(
    conn: &mut SqliteConnection,
    lote_id: Uuid,
) -> Result<Vec<(Uuid, String, String, Option<String>)>> {
    let rows = sqlx::query(
        r#"
        SELECT co.id, co.name_raw, co.affinity_key, co.observations
        FROM client_orders co
        WHERE co.lote_id = ?
          AND EXISTS (SELECT 1 FROM lines li WHERE li.client_order_id = co.id AND li.printed_at IS NULL)
        ORDER BY co.created_at ASC, co.id ASC
        "#,
    )
    .bind(lote_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            let id_raw: String = row.get("id");
            Ok((
                Uuid::parse_str(&id_raw)
                    .map_err(|e| comanda_common::Error::Internal(format!("client id: {}", e)))?,
                row.get("name_raw"),
                row.get("affinity_key"),
                row.get("observations"),
            ))
        })
        .collect()
}

/// Unprinted lines of one client order, in line order
pub async fn unprinted_lines_of_client(
    conn: &mut SqliteConnection,
    client_order_id: Uuid,
) -> Result<Vec<NewLine>> {
    let rows = sqlx::query(
        r#"
        SELECT seq_in_client, quantity, unit_raw, product_raw, product_norm, price,
               match_method, match_score, family, functional_code, operator, assigned_at
        FROM lines
        WHERE client_order_id = ? AND printed_at IS NULL
        ORDER BY seq_in_client ASC
        "#,
    )
    .bind(client_order_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            let assigned_raw: Option<String> = row.get("assigned_at");
            Ok(NewLine {
                client_order_id,
                seq_in_client: row.get("seq_in_client"),
                quantity: row.get("quantity"),
                unit_raw: row.get("unit_raw"),
                product_raw: row.get("product_raw"),
                product_norm: row.get("product_norm"),
                price: row.get("price"),
                match_method: row.get("match_method"),
                match_score: row.get("match_score"),
                family: row.get("family"),
                functional_code: row.get("functional_code"),
                operator: row.get("operator"),
                assigned_at: super::parse_ts_opt(assigned_raw)?,
            })
        })
        .collect()
}
