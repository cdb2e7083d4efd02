//! Print-job rows, their N:M link to lines, and the line stamping that
//! drives `printed_at` / `print_count`.

use super::{fmt_ts, parse_ts};
use chrono::{DateTime, Utc};
use comanda_common::Result;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PrintJobRow {
    pub id: Uuid,
    pub shift_id: Uuid,
    pub route_norm: String,
    pub actor_user: Option<String>,
    pub kind: String,
    pub status: String,
    pub pdf_ref: Option<String>,
    pub error_text: Option<String>,
    pub cutoff_lote: Option<Uuid>,
    pub from_lote: Option<Uuid>,
    pub to_lote: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

fn parse_uuid_opt(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| comanda_common::Error::Internal(format!("print job lote id: {}", e)))
    })
    .transpose()
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<PrintJobRow> {
    let id_raw: String = row.get("id");
    let shift_raw: String = row.get("shift_id");
    let created_raw: String = row.get("created_at");

    Ok(PrintJobRow {
        id: Uuid::parse_str(&id_raw)
            .map_err(|e| comanda_common::Error::Internal(format!("print job id: {}", e)))?,
        shift_id: Uuid::parse_str(&shift_raw)
            .map_err(|e| comanda_common::Error::Internal(format!("print job shift: {}", e)))?,
        route_norm: row.get("route_norm"),
        actor_user: row.get("actor_user"),
        kind: row.get("kind"),
        status: row.get("status"),
        pdf_ref: row.get("pdf_ref"),
        error_text: row.get("error_text"),
        cutoff_lote: parse_uuid_opt(row.get("cutoff_lote"))?,
        from_lote: parse_uuid_opt(row.get("from_lote"))?,
        to_lote: parse_uuid_opt(row.get("to_lote"))?,
        created_at: parse_ts(&created_raw)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    conn: &mut SqliteConnection,
    id: Uuid,
    shift_id: Uuid,
    route_norm: &str,
    actor_user: Option<&str>,
    kind: &str,
    status: &str,
    pdf_ref: Option<&str>,
    error_text: Option<&str>,
    cutoff_lote: Option<Uuid>,
    from_lote: Option<Uuid>,
    to_lote: Option<Uuid>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO print_jobs (id, shift_id, route_norm, actor_user, kind, status, pdf_ref,
                                error_text, cutoff_lote, from_lote, to_lote, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(shift_id.to_string())
    .bind(route_norm)
    .bind(actor_user)
    .bind(kind)
    .bind(status)
    .bind(pdf_ref)
    .bind(error_text)
    .bind(cutoff_lote.map(|v| v.to_string()))
    .bind(from_lote.map(|v| v.to_string()))
    .bind(to_lote.map(|v| v.to_string()))
    .bind(fmt_ts(Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn insert_item(
    conn: &mut SqliteConnection,
    print_job_id: Uuid,
    line_id: Uuid,
) -> Result<()> {
    sqlx::query("INSERT INTO print_job_items (print_job_id, line_id) VALUES (?, ?)")
        .bind(print_job_id.to_string())
        .bind(line_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Stamp one printed line: first print sets `printed_at`, every print
/// increments `print_count`
pub async fn stamp_line(conn: &mut SqliteConnection, line_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE lines SET printed_at = COALESCE(printed_at, ?), print_count = print_count + 1 WHERE id = ?",
    )
    .bind(fmt_ts(Utc::now()))
    .bind(line_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<PrintJobRow>> {
    let row = sqlx::query(
        r#"
        SELECT id, shift_id, route_norm, actor_user, kind, status, pdf_ref, error_text,
               cutoff_lote, from_lote, to_lote, created_at
        FROM print_jobs WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(row_to_job).transpose()
}

pub async fn item_line_ids(conn: &mut SqliteConnection, job_id: Uuid) -> Result<Vec<Uuid>> {
    let raw = sqlx::query_scalar::<_, String>(
        "SELECT line_id FROM print_job_items WHERE print_job_id = ?",
    )
    .bind(job_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    raw.into_iter()
        .map(|s| {
            Uuid::parse_str(&s)
                .map_err(|e| comanda_common::Error::Internal(format!("job item line: {}", e)))
        })
        .collect()
}
