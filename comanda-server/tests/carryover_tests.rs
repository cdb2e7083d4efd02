//! Shift lifecycle and carryover: unprinted work follows the warehouse
//! into the next shift.

mod helpers;

use comanda_server::db;
use comanda_server::db::route_days::VisualState;
use comanda_server::printing::{self, jobs, selector, PrintKind};
use comanda_server::shifts;
use helpers::*;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_carryover_copies_unprinted_lines() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);
    seed_catalogs(&pool, &[("LECHE", 1)], &["RUTA NORTE"]).await;
    let s1 = open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;
    qualify(&pool, s1.id, "o1", 1).await;

    let source = Arc::new(FakeMailSource::new(7));
    source.deliver(
        1,
        "Ruta Norte",
        "Cliente: Super Uno\n1 L - Leche - 1.20\n2 L - Leche - 1.20",
    );
    let ingest = ingest_service(&pool, &publisher, source);
    ingest.poll_now().await.unwrap();

    shifts::close_shift(&pool, &publisher, None, Some("tester"))
        .await
        .unwrap();

    let s2 = open_shift(&pool, &publisher, "AFTERNOON", "2026-02-15").await;

    // A fresh carried lote with both lines reset to unprinted.
    let carried: Vec<(String, i64)> = sqlx::query_as(
        "SELECT id, carried_over FROM lotes WHERE shift_id = ? AND carried_over = 1",
    )
    .bind(s2.id.to_string())
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(carried.len(), 1);

    let lines = lines_for_shift(&pool, s2.id).await;
    assert_eq!(lines.len(), 2);
    for line in &lines {
        assert_eq!(line.operator.as_deref(), Some("o1"), "bindings survive carryover");
        assert!(line.printed_at.is_none());
        assert_eq!(line.print_count, 0);
    }

    assert_eq!(count_events(&pool, "LOTE_CARRIED_OVER").await, 1);

    // The new route day starts BLUE with the carried work pending; the
    // source lote in the old shift is intact.
    let mut conn = pool.acquire().await.unwrap();
    let day = db::route_days::find(&mut conn, s2.id, "RUTA NORTE")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day.visual_state, VisualState::Blue);
    let unprinted = db::route_days::unprinted_count(&mut conn, s2.id, "RUTA NORTE")
        .await
        .unwrap();
    assert_eq!(unprinted, 2);
    drop(conn);

    let old_lines = lines_for_shift(&pool, s1.id).await;
    assert_eq!(old_lines.len(), 2);
}

#[tokio::test]
async fn test_printed_work_does_not_carry_over() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);
    seed_catalogs(&pool, &[("LECHE", 1)], &["RUTA NORTE"]).await;
    let s1 = open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;
    qualify(&pool, s1.id, "o1", 1).await;

    let source = Arc::new(FakeMailSource::new(7));
    source.deliver(1, "Ruta Norte", "Cliente: Super Uno\n1 L - Leche - 1.20");
    let ingest = ingest_service(&pool, &publisher, source);
    ingest.poll_now().await.unwrap();

    // Print the only line before the shift ends.
    let mut conn = pool.acquire().await.unwrap();
    let day = db::route_days::find(&mut conn, s1.id, "RUTA NORTE")
        .await
        .unwrap()
        .unwrap();
    drop(conn);
    printing::enter_route(&pool, &publisher, day.id, "o1")
        .await
        .unwrap();
    let mut conn = pool.acquire().await.unwrap();
    let progress = db::progress::operator_progress(&mut conn, s1.id, "o1", "RUTA NORTE")
        .await
        .unwrap()
        .unwrap();
    let lines = selector::operator_initial(&mut conn, s1.id, "RUTA NORTE", "o1", progress.cutoff_lote)
        .await
        .unwrap();
    drop(conn);
    jobs::commit_print_job(
        &pool,
        &publisher,
        Uuid::new_v4(),
        jobs::PrintCommit {
            kind: PrintKind::OperatorInitial,
            shift_id: s1.id,
            route_norm: "RUTA NORTE",
            actor: Some("o1"),
            operator: Some("o1"),
            lines: &lines,
            pdf_ref: "slip.txt",
            cutoff_lote: progress.cutoff_lote,
            from_lote: None,
        },
    )
    .await
    .unwrap();

    shifts::close_shift(&pool, &publisher, None, None).await.unwrap();
    let s2 = open_shift(&pool, &publisher, "AFTERNOON", "2026-02-15").await;

    assert_eq!(lines_for_shift(&pool, s2.id).await.len(), 0);
    assert_eq!(count_events(&pool, "LOTE_CARRIED_OVER").await, 0);
}

#[tokio::test]
async fn test_carryover_then_print_all_goes_green() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);
    seed_catalogs(&pool, &[("LECHE", 1)], &["RUTA NORTE"]).await;
    let s1 = open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;
    qualify(&pool, s1.id, "o1", 1).await;

    let source = Arc::new(FakeMailSource::new(7));
    source.deliver(
        1,
        "Ruta Norte",
        "Cliente: Super Uno\n1 L - Leche - 1.20\n2 L - Leche - 1.20",
    );
    let ingest = ingest_service(&pool, &publisher, source);
    ingest.poll_now().await.unwrap();
    shifts::close_shift(&pool, &publisher, None, None).await.unwrap();
    let s2 = open_shift(&pool, &publisher, "AFTERNOON", "2026-02-15").await;

    let mut conn = pool.acquire().await.unwrap();
    let day = db::route_days::find(&mut conn, s2.id, "RUTA NORTE")
        .await
        .unwrap()
        .unwrap();
    drop(conn);
    printing::enter_route(&pool, &publisher, day.id, "o1")
        .await
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let progress = db::progress::operator_progress(&mut conn, s2.id, "o1", "RUTA NORTE")
        .await
        .unwrap()
        .unwrap();
    let lines = selector::operator_initial(&mut conn, s2.id, "RUTA NORTE", "o1", progress.cutoff_lote)
        .await
        .unwrap();
    drop(conn);
    assert_eq!(lines.len(), 2);

    jobs::commit_print_job(
        &pool,
        &publisher,
        Uuid::new_v4(),
        jobs::PrintCommit {
            kind: PrintKind::OperatorInitial,
            shift_id: s2.id,
            route_norm: "RUTA NORTE",
            actor: Some("o1"),
            operator: Some("o1"),
            lines: &lines,
            pdf_ref: "slip.txt",
            cutoff_lote: progress.cutoff_lote,
            from_lote: None,
        },
    )
    .await
    .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let day = db::route_days::find(&mut conn, s2.id, "RUTA NORTE")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day.visual_state, VisualState::Green);
    let unprinted = db::route_days::unprinted_count(&mut conn, s2.id, "RUTA NORTE")
        .await
        .unwrap();
    assert_eq!(unprinted, 0);
}

#[tokio::test]
async fn test_shift_open_refusals() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);

    open_shift(&pool, &publisher, "MORNING", "2026-02-15").await;

    // Second open while one is active.
    let err = shifts::open_shift(&pool, &publisher, None, "AFTERNOON", "2026-02-15", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SHIFT_ALREADY_ACTIVE");

    shifts::close_shift(&pool, &publisher, None, None).await.unwrap();

    // Same (date, slot) again.
    let err = shifts::open_shift(&pool, &publisher, None, "MORNING", "2026-02-15", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_SHIFT");

    // Slot without an active schedule row.
    sqlx::query("UPDATE shift_schedules SET active = 0 WHERE slot = 'NIGHT'")
        .execute(&pool)
        .await
        .unwrap();
    let err = shifts::open_shift(&pool, &publisher, None, "NIGHT", "2026-02-16", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SCHEDULE_NOT_FOUND");
}

#[tokio::test]
async fn test_close_without_active_shift_refuses() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);

    let err = shifts::close_shift(&pool, &publisher, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_ACTIVE_SHIFT");
}

#[tokio::test]
async fn test_auto_closer_closes_overdue_shift() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);

    // The schedule puts this 2020 shift's end far in the past.
    open_shift(&pool, &publisher, "MORNING", "2020-01-01").await;

    let closed = shifts::close_overdue(&pool, &publisher).await.unwrap();
    assert!(closed.is_some());
    assert_eq!(count_events(&pool, "SHIFT_CLOSED_AUTO").await, 1);

    let mut conn = pool.acquire().await.unwrap();
    assert!(db::shifts::active_shift(&mut conn).await.unwrap().is_none());
}

#[tokio::test]
async fn test_at_most_one_active_shift_over_lifecycle() {
    let pool = test_pool().await;
    let publisher = test_publisher(&pool);

    for (slot, date) in [
        ("MORNING", "2026-02-15"),
        ("AFTERNOON", "2026-02-15"),
        ("NIGHT", "2026-02-15"),
    ] {
        open_shift(&pool, &publisher, slot, date).await;
        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM shifts WHERE state = 'ACTIVE'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(active, 1);
        shifts::close_shift(&pool, &publisher, None, None).await.unwrap();
    }
}
