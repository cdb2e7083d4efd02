//! Assignment state: per-shift operator pools, sticky client affinities
//! and the round-robin cursors.
//!
//! All three serialize on their database rows; two concurrent pipeline
//! transactions assigning on the same `(shift, functional_code)` conflict
//! there and one retries.

use comanda_common::Result;
use sqlx::SqliteConnection;
use uuid::Uuid;

/// Ordered operator pool for a functional code: enabled qualification
/// rows, operator id ascending
pub async fn pool(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    functional_code: i64,
) -> Result<Vec<String>> {
    let users = sqlx::query_scalar::<_, String>(
        r#"
        SELECT user_id FROM shift_qualifications
        WHERE shift_id = ? AND functional_code = ? AND enabled = 1
        ORDER BY user_id ASC
        "#,
    )
    .bind(shift_id.to_string())
    .bind(functional_code)
    .fetch_all(&mut *conn)
    .await?;

    Ok(users)
}

pub async fn affinity(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    affinity_key: &str,
    functional_code: i64,
) -> Result<Option<String>> {
    let operator = sqlx::query_scalar::<_, String>(
        "SELECT operator FROM owner_affinities WHERE shift_id = ? AND affinity_key = ? AND functional_code = ?",
    )
    .bind(shift_id.to_string())
    .bind(affinity_key)
    .bind(functional_code)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(operator)
}

pub async fn upsert_affinity(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    affinity_key: &str,
    functional_code: i64,
    operator: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO owner_affinities (shift_id, affinity_key, functional_code, operator)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(shift_id, affinity_key, functional_code) DO UPDATE SET operator = excluded.operator
        "#,
    )
    .bind(shift_id.to_string())
    .bind(affinity_key)
    .bind(functional_code)
    .bind(operator)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn cursor(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    functional_code: i64,
) -> Result<Option<String>> {
    let last = sqlx::query_scalar::<_, Option<String>>(
        "SELECT last_operator FROM round_robin_cursors WHERE shift_id = ? AND functional_code = ?",
    )
    .bind(shift_id.to_string())
    .bind(functional_code)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(last.flatten())
}

pub async fn set_cursor(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    functional_code: i64,
    operator: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO round_robin_cursors (shift_id, functional_code, last_operator)
        VALUES (?, ?, ?)
        ON CONFLICT(shift_id, functional_code) DO UPDATE SET last_operator = excluded.last_operator
        "#,
    )
    .bind(shift_id.to_string())
    .bind(functional_code)
    .bind(operator)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
