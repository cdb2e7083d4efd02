//! Print engine tests: enter/cutoff snapshots, selectors, cursor
//! advancement, reprints and stamping.

mod helpers;

use comanda_server::db;
use comanda_server::db::route_days::RouteDay;
use comanda_server::printing::{self, jobs, selector, PrintKind};
use comanda_server::publisher::EventPublisher;
use helpers::*;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

async fn route_day(pool: &SqlitePool, shift_id: Uuid, route: &str) -> RouteDay {
    let mut conn = pool.acquire().await.unwrap();
    db::route_days::find(&mut conn, shift_id, route)
        .await
        .unwrap()
        .expect("route day")
}

/// Operator-initial print against the current progress row
async fn print_initial(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    day: &RouteDay,
    operator: &str,
) -> usize {
    let mut conn = pool.acquire().await.unwrap();
    let progress = db::progress::operator_progress(&mut conn, day.shift_id, operator, &day.route_norm)
        .await
        .unwrap()
        .expect("entered");
    let lines = selector::operator_initial(
        &mut conn,
        day.shift_id,
        &day.route_norm,
        operator,
        progress.cutoff_lote,
    )
    .await
    .unwrap();
    drop(conn);

    let count = lines.len();
    jobs::commit_print_job(
        pool,
        publisher,
        Uuid::new_v4(),
        jobs::PrintCommit {
            kind: PrintKind::OperatorInitial,
            shift_id: day.shift_id,
            route_norm: &day.route_norm,
            actor: Some(operator),
            operator: Some(operator),
            lines: &lines,
            pdf_ref: "initial.txt",
            cutoff_lote: progress.cutoff_lote,
            from_lote: None,
        },
    )
    .await
    .unwrap();
    count
}

async fn print_new(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    day: &RouteDay,
    operator: &str,
) -> usize {
    let mut conn = pool.acquire().await.unwrap();
    let progress = db::progress::operator_progress(&mut conn, day.shift_id, operator, &day.route_norm)
        .await
        .unwrap()
        .expect("entered");
    let boundary = progress.last_printed_lote.or(progress.cutoff_lote);
    let lines = selector::operator_new(
        &mut conn,
        day.shift_id,
        &day.route_norm,
        operator,
        boundary,
    )
    .await
    .unwrap();
    drop(conn);

    let count = lines.len();
    if count == 0 {
        return 0;
    }
    jobs::commit_print_job(
        pool,
        publisher,
        Uuid::new_v4(),
        jobs::PrintCommit {
            kind: PrintKind::OperatorNew,
            shift_id: day.shift_id,
            route_norm: &day.route_norm,
            actor: Some(operator),
            operator: Some(operator),
            lines: &lines,
            pdf_ref: "new.txt",
            cutoff_lote: progress.cutoff_lote,
            from_lote: boundary,
        },
    )
    .await
    .unwrap();
    count
}

#[tokio::test]
async fn test_enter_twice_keeps_cutoff() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);
    seed_catalogs(&pool, &[("LECHE", 1)], &["RUTA NORTE"]).await;
    let shift = open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;
    qualify(&pool, shift.id, "o1", 1).await;

    let source = Arc::new(FakeMailSource::new(7));
    source.deliver(1, "Ruta Norte", "Cliente: Super Uno\n1 L - Leche - 1.20");
    let ingest = ingest_service(&pool, &publisher, source.clone());
    ingest.poll_now().await.unwrap();

    let day = route_day(&pool, shift.id, "RUTA NORTE").await;
    let first = printing::enter_route(&pool, &publisher, day.id, "o1").await.unwrap();
    assert!(first.entered);
    let cutoff = first.cutoff_lote.expect("cutoff snapshot");

    // A second lote lands; re-entering must not move the snapshot.
    source.deliver(2, "Ruta Norte", "Cliente: Super Uno\n2 L - Leche - 1.20");
    ingest.poll_now().await.unwrap();

    let again = printing::enter_route(&pool, &publisher, day.id, "o1").await.unwrap();
    assert!(!again.entered);
    assert_eq!(again.cutoff_lote, Some(cutoff));
    assert_eq!(count_events(&pool, "OPERATOR_ENTERED_ROUTE").await, 1);
}

#[tokio::test]
async fn test_initial_is_cutoff_snapshot_and_new_picks_up_rest() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);
    seed_catalogs(&pool, &[("LECHE", 1)], &["RUTA NORTE"]).await;
    let shift = open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;
    qualify(&pool, shift.id, "o1", 1).await;

    let source = Arc::new(FakeMailSource::new(7));
    source.deliver(1, "Ruta Norte", "Cliente: Super Uno\n1 L - Leche - 1.20");
    let ingest = ingest_service(&pool, &publisher, source.clone());
    ingest.poll_now().await.unwrap();

    let day = route_day(&pool, shift.id, "RUTA NORTE").await;
    printing::enter_route(&pool, &publisher, day.id, "o1").await.unwrap();

    // Work arriving after the snapshot belongs to the "new" print.
    source.deliver(2, "Ruta Norte", "Cliente: Super Uno\n2 L - Leche - 1.20");
    ingest.poll_now().await.unwrap();

    assert_eq!(print_initial(&pool, &publisher, &day, "o1").await, 1);

    let lines = lines_for_shift(&pool, shift.id).await;
    assert_eq!(lines.iter().filter(|l| l.printed_at.is_some()).count(), 1);

    assert_eq!(print_new(&pool, &publisher, &day, "o1").await, 1);
    let lines = lines_for_shift(&pool, shift.id).await;
    assert!(lines.iter().all(|l| l.printed_at.is_some()));
    assert!(lines.iter().all(|l| l.print_count == 1));

    // Nothing further to print.
    assert_eq!(print_new(&pool, &publisher, &day, "o1").await, 0);
}

#[tokio::test]
async fn test_initial_only_covers_own_lines() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);
    seed_catalogs(&pool, &[("LECHE", 1), ("PAN", 2)], &["RUTA NORTE"]).await;
    let shift = open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;
    qualify(&pool, shift.id, "o1", 1).await;
    qualify(&pool, shift.id, "o2", 2).await;

    let source = Arc::new(FakeMailSource::new(7));
    source.deliver(
        1,
        "Ruta Norte",
        "Cliente: Super Uno\n1 L - Leche - 1.20\n2 ud - Pan - 0.80",
    );
    let ingest = ingest_service(&pool, &publisher, source);
    ingest.poll_now().await.unwrap();

    let day = route_day(&pool, shift.id, "RUTA NORTE").await;
    printing::enter_route(&pool, &publisher, day.id, "o1").await.unwrap();
    assert_eq!(print_initial(&pool, &publisher, &day, "o1").await, 1);

    let lines = lines_for_shift(&pool, shift.id).await;
    let leche = lines.iter().find(|l| l.product_norm == "LECHE").unwrap();
    let pan = lines.iter().find(|l| l.product_norm == "PAN").unwrap();
    assert!(leche.printed_at.is_some());
    assert!(pan.printed_at.is_none(), "the other operator's line is untouched");
}

#[tokio::test]
async fn test_collector_print_covers_everything_and_advances_cursor() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);
    seed_catalogs(&pool, &[("LECHE", 1)], &["RUTA NORTE"]).await;
    let shift = open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;
    qualify(&pool, shift.id, "o1", 1).await;

    let source = Arc::new(FakeMailSource::new(7));
    source.deliver(1, "Ruta Norte", "Cliente: Super Uno\n1 L - Leche - 1.20");
    source.deliver(2, "Ruta Norte", "Cliente: Super Dos\n9 ud - desconocido - 1.00");
    let ingest = ingest_service(&pool, &publisher, source.clone());
    ingest.poll_now().await.unwrap();

    let day = route_day(&pool, shift.id, "RUTA NORTE").await;

    // Collector sheet takes every line, assigned or not.
    let mut conn = pool.acquire().await.unwrap();
    let lines = selector::collector_new(&mut conn, shift.id, "RUTA NORTE", None)
        .await
        .unwrap();
    drop(conn);
    assert_eq!(lines.len(), 2);
    let to_lote = lines.last().unwrap().lote_id;

    jobs::commit_print_job(
        &pool,
        &publisher,
        Uuid::new_v4(),
        jobs::PrintCommit {
            kind: PrintKind::CollectorNew,
            shift_id: day.shift_id,
            route_norm: &day.route_norm,
            actor: Some("collector"),
            operator: None,
            lines: &lines,
            pdf_ref: "colecta.txt",
            cutoff_lote: None,
            from_lote: None,
        },
    )
    .await
    .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let progress = db::progress::collector_progress(&mut conn, shift.id, "RUTA NORTE")
        .await
        .unwrap()
        .expect("collector cursor created");
    assert_eq!(progress.last_closed_lote, Some(to_lote));

    // Only strictly newer lotes remain for the next sheet.
    let remaining =
        selector::collector_new(&mut conn, shift.id, "RUTA NORTE", progress.last_closed_lote)
            .await
            .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn test_reprint_increments_count_without_moving_cursors() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);
    seed_catalogs(&pool, &[("LECHE", 1)], &["RUTA NORTE"]).await;
    let shift = open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;
    qualify(&pool, shift.id, "o1", 1).await;

    let source = Arc::new(FakeMailSource::new(7));
    source.deliver(1, "Ruta Norte", "Cliente: Super Uno\n1 L - Leche - 1.20");
    let ingest = ingest_service(&pool, &publisher, source);
    ingest.poll_now().await.unwrap();

    let day = route_day(&pool, shift.id, "RUTA NORTE").await;
    printing::enter_route(&pool, &publisher, day.id, "o1").await.unwrap();
    print_initial(&pool, &publisher, &day, "o1").await;

    let job_id: String = sqlx::query_scalar("SELECT id FROM print_jobs WHERE kind = 'OPERATOR_INITIAL'")
        .fetch_one(&pool)
        .await
        .unwrap();
    let mut conn = pool.acquire().await.unwrap();
    let before = db::progress::operator_progress(&mut conn, shift.id, "o1", "RUTA NORTE")
        .await
        .unwrap()
        .unwrap();
    let lines = selector::lines_of_job(&mut conn, job_id.parse().unwrap())
        .await
        .unwrap();
    drop(conn);

    jobs::commit_print_job(
        &pool,
        &publisher,
        Uuid::new_v4(),
        jobs::PrintCommit {
            kind: PrintKind::Reprint,
            shift_id: day.shift_id,
            route_norm: &day.route_norm,
            actor: Some("o1"),
            operator: Some("o1"),
            lines: &lines,
            pdf_ref: "reprint.txt",
            cutoff_lote: None,
            from_lote: None,
        },
    )
    .await
    .unwrap();

    let rows = lines_for_shift(&pool, shift.id).await;
    assert_eq!(rows[0].print_count, 2);
    assert!(rows[0].printed_at.is_some());

    let mut conn = pool.acquire().await.unwrap();
    let after = db::progress::operator_progress(&mut conn, shift.id, "o1", "RUTA NORTE")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.last_printed_lote, before.last_printed_lote);
}

#[tokio::test]
async fn test_nothing_to_print_on_empty_snapshot() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);
    seed_catalogs(&pool, &[("LECHE", 1)], &["RUTA NORTE"]).await;
    let shift = open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;
    qualify(&pool, shift.id, "o1", 1).await;

    // Route day exists but no OK lote does: enter snapshots a null cutoff.
    let mut conn = pool.acquire().await.unwrap();
    let day = db::route_days::find_or_create(&mut conn, shift.id, "RUTA NORTE")
        .await
        .unwrap();
    drop(conn);

    let outcome = printing::enter_route(&pool, &publisher, day.id, "o1").await.unwrap();
    assert!(outcome.entered);
    assert_eq!(outcome.cutoff_lote, None);

    let mut conn = pool.acquire().await.unwrap();
    let lines = selector::operator_initial(&mut conn, shift.id, "RUTA NORTE", "o1", None)
        .await
        .unwrap();
    assert!(lines.is_empty());
    drop(conn);

    let err = jobs::commit_print_job(
        &pool,
        &publisher,
        Uuid::new_v4(),
        jobs::PrintCommit {
            kind: PrintKind::OperatorInitial,
            shift_id: day.shift_id,
            route_norm: &day.route_norm,
            actor: Some("o1"),
            operator: Some("o1"),
            lines: &[],
            pdf_ref: "empty.txt",
            cutoff_lote: None,
            from_lote: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "NOTHING_TO_PRINT");
}

#[tokio::test]
async fn test_failed_render_job_stamps_nothing() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);
    seed_catalogs(&pool, &[("LECHE", 1)], &["RUTA NORTE"]).await;
    let shift = open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;
    qualify(&pool, shift.id, "o1", 1).await;

    let source = Arc::new(FakeMailSource::new(7));
    source.deliver(1, "Ruta Norte", "Cliente: Super Uno\n1 L - Leche - 1.20");
    let ingest = ingest_service(&pool, &publisher, source);
    ingest.poll_now().await.unwrap();

    let day = route_day(&pool, shift.id, "RUTA NORTE").await;
    jobs::record_failed_job(
        &pool,
        PrintKind::OperatorInitial,
        day.shift_id,
        &day.route_norm,
        Some("o1"),
        "renderer exploded",
    )
    .await
    .unwrap();

    let status: String = sqlx::query_scalar("SELECT status FROM print_jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "FAILED");

    let lines = lines_for_shift(&pool, shift.id).await;
    assert!(lines[0].printed_at.is_none());
    assert_eq!(lines[0].print_count, 0);
    assert_eq!(count_events(&pool, "PRINT_EMITTED").await, 0);
}
