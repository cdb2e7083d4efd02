//! Database initialization.
//!
//! The schema is created idempotently at startup: every table function is
//! `CREATE TABLE IF NOT EXISTS` and safe to call on an existing database.
//! The database is the sole durable shared state of the system; the two
//! structural invariants the engine itself enforces are the partial unique
//! index keeping at most one shift ACTIVE and the unique
//! `(imap_uidvalidity, imap_uid)` pair anchoring ingest idempotency.

use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Open (creating if needed) the database and apply the schema
pub async fn init_database(database_url: &str) -> Result<SqlitePool> {
    let pool = SqlitePool::connect(database_url).await?;
    info!("Database opened: {}", database_url);
    create_schema(&pool).await?;
    Ok(pool)
}

/// Apply the full schema to an open pool (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_shifts_table(pool).await?;
    create_shift_schedules_table(pool).await?;
    create_shift_qualifications_table(pool).await?;
    create_route_collectors_table(pool).await?;
    create_catalog_tables(pool).await?;
    create_lotes_table(pool).await?;
    create_client_orders_table(pool).await?;
    create_lines_table(pool).await?;
    create_route_days_table(pool).await?;
    create_assignment_tables(pool).await?;
    create_progress_tables(pool).await?;
    create_print_tables(pool).await?;
    create_imap_cursor_table(pool).await?;
    create_events_table(pool).await?;

    seed_default_schedules(pool).await?;

    Ok(())
}

async fn create_shifts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shifts (
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            slot TEXT NOT NULL CHECK (slot IN ('MORNING', 'AFTERNOON', 'NIGHT')),
            state TEXT NOT NULL DEFAULT 'CREATED' CHECK (state IN ('CREATED', 'ACTIVE', 'CLOSED')),
            started_at TEXT,
            scheduled_end_at TEXT,
            ended_at TEXT,
            opened_by TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (date, slot)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one ACTIVE shift across the whole system
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_shifts_single_active ON shifts(state) WHERE state = 'ACTIVE'",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_shift_schedules_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shift_schedules (
            slot TEXT PRIMARY KEY CHECK (slot IN ('MORNING', 'AFTERNOON', 'NIGHT')),
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn seed_default_schedules(pool: &SqlitePool) -> Result<()> {
    let defaults = [
        ("MORNING", "06:00", "14:00"),
        ("AFTERNOON", "14:00", "22:00"),
        ("NIGHT", "22:00", "06:00"),
    ];

    for (slot, start, end) in defaults {
        sqlx::query(
            "INSERT OR IGNORE INTO shift_schedules (slot, start_time, end_time, active) VALUES (?, ?, ?, 1)",
        )
        .bind(slot)
        .bind(start)
        .bind(end)
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn create_shift_qualifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shift_qualifications (
            shift_id TEXT NOT NULL REFERENCES shifts(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            functional_code INTEGER NOT NULL CHECK (functional_code BETWEEN 1 AND 6),
            enabled INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (shift_id, user_id, functional_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_route_collectors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS route_collectors (
            shift_id TEXT NOT NULL REFERENCES shifts(id) ON DELETE CASCADE,
            route_norm TEXT NOT NULL,
            collector_user TEXT NOT NULL,
            PRIMARY KEY (shift_id, route_norm)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_catalog_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products_catalogs (
            version INTEGER PRIMARY KEY AUTOINCREMENT,
            active INTEGER NOT NULL DEFAULT 0,
            activated_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_products_catalogs_active ON products_catalogs(active) WHERE active = 1",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_products (
            catalog_version INTEGER NOT NULL REFERENCES products_catalogs(version) ON DELETE CASCADE,
            product_id TEXT NOT NULL,
            norm_name TEXT NOT NULL,
            family INTEGER NOT NULL CHECK (family BETWEEN 1 AND 6),
            PRIMARY KEY (catalog_version, norm_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS routes_catalogs (
            version INTEGER PRIMARY KEY AUTOINCREMENT,
            active INTEGER NOT NULL DEFAULT 0,
            activated_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_routes_catalogs_active ON routes_catalogs(active) WHERE active = 1",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_routes (
            catalog_version INTEGER NOT NULL REFERENCES routes_catalogs(version) ON DELETE CASCADE,
            norm_name TEXT NOT NULL,
            PRIMARY KEY (catalog_version, norm_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_lotes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lotes (
            id TEXT PRIMARY KEY,
            imap_uidvalidity INTEGER,
            imap_uid INTEGER,
            received_at TEXT NOT NULL,
            subject_raw TEXT NOT NULL DEFAULT '',
            body_raw TEXT NOT NULL DEFAULT '',
            parse_status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (parse_status IN ('PENDING', 'OK', 'ERROR_ROUTE', 'ERROR_PARSE')),
            parse_error TEXT,
            shift_id TEXT NOT NULL REFERENCES shifts(id) ON DELETE CASCADE,
            route_norm TEXT,
            products_catalog_version INTEGER,
            routes_catalog_version INTEGER,
            carried_over INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Idempotency anchor of the ingest; NULL for carried-over lotes
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_lotes_imap_identity ON lotes(imap_uidvalidity, imap_uid)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_lotes_shift_route ON lotes(shift_id, route_norm)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_client_orders_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS client_orders (
            id TEXT PRIMARY KEY,
            lote_id TEXT NOT NULL REFERENCES lotes(id) ON DELETE CASCADE,
            name_raw TEXT NOT NULL,
            affinity_key TEXT NOT NULL,
            observations TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_client_orders_lote ON client_orders(lote_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_lines_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lines (
            id TEXT PRIMARY KEY,
            client_order_id TEXT NOT NULL REFERENCES client_orders(id) ON DELETE CASCADE,
            seq_in_client INTEGER NOT NULL,
            quantity REAL NOT NULL,
            unit_raw TEXT NOT NULL,
            product_raw TEXT NOT NULL,
            product_norm TEXT NOT NULL,
            price REAL,
            currency TEXT NOT NULL DEFAULT 'EUR',
            match_method TEXT CHECK (match_method IS NULL OR match_method IN ('EXACT', 'FUZZY')),
            match_score REAL,
            family INTEGER NOT NULL CHECK (family BETWEEN 1 AND 6),
            functional_code INTEGER NOT NULL CHECK (functional_code BETWEEN 1 AND 6),
            operator TEXT,
            assigned_at TEXT,
            printed_at TEXT,
            print_count INTEGER NOT NULL DEFAULT 0,
            CHECK ((printed_at IS NULL AND print_count = 0) OR (printed_at IS NOT NULL AND print_count > 0))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_lines_client_order ON lines(client_order_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_lines_operator ON lines(operator)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_route_days_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS route_days (
            id TEXT PRIMARY KEY,
            shift_id TEXT NOT NULL REFERENCES shifts(id) ON DELETE CASCADE,
            route_norm TEXT NOT NULL,
            visual_state TEXT NOT NULL DEFAULT 'BLUE' CHECK (visual_state IN ('BLUE', 'GREEN', 'RED')),
            logical_state TEXT NOT NULL DEFAULT 'ACTIVE' CHECK (logical_state IN ('ACTIVE', 'COLLECTED')),
            reactivations_count INTEGER NOT NULL DEFAULT 0,
            last_event_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (shift_id, route_norm)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_assignment_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS owner_affinities (
            shift_id TEXT NOT NULL REFERENCES shifts(id) ON DELETE CASCADE,
            affinity_key TEXT NOT NULL,
            functional_code INTEGER NOT NULL CHECK (functional_code BETWEEN 1 AND 6),
            operator TEXT NOT NULL,
            PRIMARY KEY (shift_id, affinity_key, functional_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS round_robin_cursors (
            shift_id TEXT NOT NULL REFERENCES shifts(id) ON DELETE CASCADE,
            functional_code INTEGER NOT NULL CHECK (functional_code BETWEEN 1 AND 6),
            last_operator TEXT,
            PRIMARY KEY (shift_id, functional_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_progress_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS operator_route_progress (
            shift_id TEXT NOT NULL REFERENCES shifts(id) ON DELETE CASCADE,
            operator TEXT NOT NULL,
            route_norm TEXT NOT NULL,
            entered_at TEXT NOT NULL,
            cutoff_lote TEXT,
            last_printed_lote TEXT,
            last_printed_at TEXT,
            PRIMARY KEY (shift_id, operator, route_norm)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collector_route_progress (
            shift_id TEXT NOT NULL REFERENCES shifts(id) ON DELETE CASCADE,
            route_norm TEXT NOT NULL,
            last_closed_lote TEXT,
            last_closed_at TEXT,
            PRIMARY KEY (shift_id, route_norm)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_print_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS print_jobs (
            id TEXT PRIMARY KEY,
            shift_id TEXT NOT NULL REFERENCES shifts(id) ON DELETE CASCADE,
            route_norm TEXT NOT NULL,
            actor_user TEXT,
            kind TEXT NOT NULL CHECK (kind IN ('OPERATOR_INITIAL', 'OPERATOR_NEW', 'COLLECTOR_NEW', 'REPRINT')),
            status TEXT NOT NULL DEFAULT 'CREATED' CHECK (status IN ('CREATED', 'PDF_READY', 'SENT', 'FAILED')),
            pdf_ref TEXT,
            error_text TEXT,
            cutoff_lote TEXT,
            from_lote TEXT,
            to_lote TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS print_job_items (
            print_job_id TEXT NOT NULL REFERENCES print_jobs(id) ON DELETE CASCADE,
            line_id TEXT NOT NULL REFERENCES lines(id) ON DELETE CASCADE,
            PRIMARY KEY (print_job_id, line_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_imap_cursor_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS imap_cursor (
            mailbox TEXT PRIMARY KEY,
            last_uid INTEGER NOT NULL DEFAULT 0,
            uidvalidity INTEGER,
            last_poll_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL,
            actor TEXT,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        create_schema(&pool).await.expect("schema");
        pool
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = memory_pool().await;
        create_schema(&pool).await.expect("second run");
    }

    #[tokio::test]
    async fn test_single_active_shift_enforced() {
        let pool = memory_pool().await;

        sqlx::query(
            "INSERT INTO shifts (id, date, slot, state, created_at) VALUES ('a', '2026-02-15', 'MORNING', 'ACTIVE', 't')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let second = sqlx::query(
            "INSERT INTO shifts (id, date, slot, state, created_at) VALUES ('b', '2026-02-15', 'AFTERNOON', 'ACTIVE', 't')",
        )
        .execute(&pool)
        .await;
        assert!(second.is_err(), "two ACTIVE shifts must be rejected");

        // A CLOSED shift alongside the ACTIVE one is fine.
        sqlx::query(
            "INSERT INTO shifts (id, date, slot, state, created_at) VALUES ('c', '2026-02-15', 'NIGHT', 'CLOSED', 't')",
        )
        .execute(&pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_imap_identity_unique_but_nullable() {
        let pool = memory_pool().await;
        sqlx::query(
            "INSERT INTO shifts (id, date, slot, state, created_at) VALUES ('s', '2026-02-15', 'MORNING', 'ACTIVE', 't')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let insert = "INSERT INTO lotes (id, imap_uidvalidity, imap_uid, received_at, shift_id, created_at) VALUES (?, ?, ?, 't', 's', 't')";
        sqlx::query(insert).bind("l1").bind(7).bind(1).execute(&pool).await.unwrap();

        let dup = sqlx::query(insert).bind("l2").bind(7).bind(1).execute(&pool).await;
        assert!(dup.is_err(), "duplicate (uidvalidity, uid) must be rejected");

        // Carried-over lotes have no IMAP identity; several may coexist.
        let carried = "INSERT INTO lotes (id, received_at, shift_id, carried_over, created_at) VALUES (?, 't', 's', 1, 't')";
        sqlx::query(carried).bind("c1").execute(&pool).await.unwrap();
        sqlx::query(carried).bind("c2").execute(&pool).await.unwrap();
    }
}
