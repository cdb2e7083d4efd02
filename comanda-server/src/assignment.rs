//! Deterministic operator assignment: pool lookup, sticky affinity,
//! round-robin fallback.
//!
//! Runs on the batch transaction's connection so the cursor advance and
//! the affinity upsert commit (or roll back) together with the lines they
//! assigned.

use crate::db;
use comanda_common::normalize::normalize;
use comanda_common::Result;
use sqlx::SqliteConnection;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentReason {
    Affinity,
    RoundRobin,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub operator: String,
    pub reason: AssignmentReason,
}

/// Resolve the operator for one line. `None` means the pool for this
/// functional code is empty; the line stays unassigned.
///
/// Within a shift and functional code the same client always lands on the
/// same operator while that operator remains in the pool; a stale affinity
/// re-binds to the next round-robin pick.
pub async fn assign_operator(
    conn: &mut SqliteConnection,
    shift_id: Uuid,
    client_name_raw: &str,
    functional_code: i64,
) -> Result<Option<Assignment>> {
    let affinity_key = normalize(client_name_raw);

    let pool = db::assignment::pool(&mut *conn, shift_id, functional_code).await?;
    if pool.is_empty() {
        return Ok(None);
    }

    if let Some(bound) =
        db::assignment::affinity(&mut *conn, shift_id, &affinity_key, functional_code).await?
    {
        if pool.iter().any(|u| u == &bound) {
            return Ok(Some(Assignment {
                operator: bound,
                reason: AssignmentReason::Affinity,
            }));
        }
    }

    let last = db::assignment::cursor(&mut *conn, shift_id, functional_code).await?;
    let next = match last.and_then(|l| pool.iter().position(|u| u == &l)) {
        Some(pos) => pool[(pos + 1) % pool.len()].clone(),
        None => pool[0].clone(),
    };

    db::assignment::set_cursor(&mut *conn, shift_id, functional_code, &next).await?;
    db::assignment::upsert_affinity(&mut *conn, shift_id, &affinity_key, functional_code, &next)
        .await?;

    Ok(Some(Assignment {
        operator: next,
        reason: AssignmentReason::RoundRobin,
    }))
}
