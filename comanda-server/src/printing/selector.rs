//! Line selection for printing.
//!
//! All three selectors share one ordering: lotes by `(created_at, id)`,
//! clients by creation order within the lote, lines by their sequence
//! within the client. The returned list is an immutable snapshot the
//! caller renders and commits against.

use comanda_common::Result;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

/// One selectable line with enough context to render a comanda
#[derive(Debug, Clone)]
pub struct PrintLine {
    pub line_id: Uuid,
    pub lote_id: Uuid,
    pub client_order_id: Uuid,
    pub client_name: String,
    pub observations: Option<String>,
    pub seq_in_client: i64,
    pub quantity: f64,
    pub unit_raw: String,
    pub product_raw: String,
    pub product_norm: String,
    pub price: Option<f64>,
    pub operator: Option<String>,
}

const SELECT_BASE: &str = r#"
SELECT li.id AS line_id, l.id AS lote_id, co.id AS client_order_id,
       co.name_raw AS client_name, co.observations,
       li.seq_in_client, li.quantity, li.unit_raw, li.product_raw, li.product_norm,
       li.price, li.operator
FROM lines li
JOIN client_orders co ON li.client_order_id = co.id
JOIN lotes l ON co.lote_id = l.id
WHERE l.shift_id = ? AND l.route_norm = ? AND l.parse_status = 'OK'
"#;

const ORDER_SUFFIX: &str =
    " ORDER BY l.created_at ASC, l.id ASC, co.created_at ASC, co.id ASC, li.seq_in_client ASC";

fn row_to_line(row: sqlx::sqlite::SqliteRow) -> Result<PrintLine> {
    let parse = |field: &str, raw: String| {
        Uuid::parse_str(&raw)
            .map_err(|e| comanda_common::Error::Internal(format!("{}: {}", field, e)))
    };

    Ok(PrintLine {
        line_id: parse("line id", row.get("line_id"))?,
        lote_id: parse("lote id", row.get("lote_id"))?,
        client_order_id: parse("client order id", row.get("client_order_id"))?,
        client_name: row.get("client_name"),
        observations: row.get("observations"),
        seq_in_client: row.get("seq_in_client"),
        quantity: row.get("quantity"),
        unit_raw: row.get("unit_raw"),
        product_raw: row.get("product_raw"),
        product_norm: row.get("product_norm"),
        price: row.get("price"),
        operator: row.get("operator"),
    })
}

/// Operator initial print: the operator's lines up to and including the
/// cutoff lote. A null cutoff (entered an empty route) selects nothing.
pub async fn operator_initial(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    route_norm: &str,
    operator: &str,
    cutoff_lote: Option<Uuid>,
) -> Result<Vec<PrintLine>> {
    let Some(cutoff) = cutoff_lote else {
        return Ok(Vec::new());
    };

    let sql = format!(
        "{} AND li.operator = ? AND (l.created_at, l.id) <= (SELECT created_at, id FROM lotes WHERE id = ?){}",
        SELECT_BASE, ORDER_SUFFIX
    );
    let rows = sqlx::query(&sql)
        .bind(shift_id.to_string())
        .bind(route_norm)
        .bind(operator)
        .bind(cutoff.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.into_iter().map(row_to_line).collect()
}

/// Operator "new" print: the operator's lines strictly after `after_lote`,
/// or all of them when no boundary exists yet.
pub async fn operator_new(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    route_norm: &str,
    operator: &str,
    after_lote: Option<Uuid>,
) -> Result<Vec<PrintLine>> {
    let rows = match after_lote {
        Some(after) => {
            let sql = format!(
                "{} AND li.operator = ? AND (l.created_at, l.id) > (SELECT created_at, id FROM lotes WHERE id = ?){}",
                SELECT_BASE, ORDER_SUFFIX
            );
            sqlx::query(&sql)
                .bind(shift_id.to_string())
                .bind(route_norm)
                .bind(operator)
                .bind(after.to_string())
                .fetch_all(&mut *conn)
                .await?
        }
        None => {
            let sql = format!("{} AND li.operator = ?{}", SELECT_BASE, ORDER_SUFFIX);
            sqlx::query(&sql)
                .bind(shift_id.to_string())
                .bind(route_norm)
                .bind(operator)
                .fetch_all(&mut *conn)
                .await?
        }
    };

    rows.into_iter().map(row_to_line).collect()
}

/// Collector print: every line of the route strictly after the collector
/// cursor (all of them when the cursor is null); no operator filter.
pub async fn collector_new(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    route_norm: &str,
    after_lote: Option<Uuid>,
) -> Result<Vec<PrintLine>> {
    let rows = match after_lote {
        Some(after) => {
            let sql = format!(
                "{} AND (l.created_at, l.id) > (SELECT created_at, id FROM lotes WHERE id = ?){}",
                SELECT_BASE, ORDER_SUFFIX
            );
            sqlx::query(&sql)
                .bind(shift_id.to_string())
                .bind(route_norm)
                .bind(after.to_string())
                .fetch_all(&mut *conn)
                .await?
        }
        None => {
            let sql = format!("{}{}", SELECT_BASE, ORDER_SUFFIX);
            sqlx::query(&sql)
                .bind(shift_id.to_string())
                .bind(route_norm)
                .fetch_all(&mut *conn)
                .await?
        }
    };

    rows.into_iter().map(row_to_line).collect()
}

/// Load the exact line set of a prior job, in selector order; the reprint
/// snapshot
pub async fn lines_of_job(
    conn: &mut SqliteConnection,
    job_id: Uuid,
) -> Result<Vec<PrintLine>> {
    let sql = r#"
        SELECT li.id AS line_id, l.id AS lote_id, co.id AS client_order_id,
               co.name_raw AS client_name, co.observations,
               li.seq_in_client, li.quantity, li.unit_raw, li.product_raw, li.product_norm,
               li.price, li.operator
        FROM print_job_items pji
        JOIN lines li ON pji.line_id = li.id
        JOIN client_orders co ON li.client_order_id = co.id
        JOIN lotes l ON co.lote_id = l.id
        WHERE pji.print_job_id = ?
        ORDER BY l.created_at ASC, l.id ASC, co.created_at ASC, co.id ASC, li.seq_in_client ASC
    "#;
    let rows = sqlx::query(sql)
        .bind(job_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.into_iter().map(row_to_line).collect()
}
