//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use comanda_common::events::EventBus;
use comanda_common::Result;
use comanda_server::db;
use comanda_server::db::shifts::Shift;
use comanda_server::ingest::{IngestService, MailSource, RawMessage};
use comanda_server::publisher::EventPublisher;
use comanda_server::shifts;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Single-connection in-memory database with the schema applied
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    comanda_common::db::create_schema(&pool)
        .await
        .expect("schema");
    pool
}

pub fn test_publisher(pool: &SqlitePool) -> EventPublisher {
    EventPublisher::new(pool.clone(), EventBus::new(64))
}

/// Seed and activate a products catalog (`(norm_name, family)`) and a
/// routes catalog
pub async fn seed_catalogs(pool: &SqlitePool, products: &[(&str, i64)], routes: &[&str]) {
    let mut conn = pool.acquire().await.unwrap();

    let entries: Vec<(String, String, i64)> = products
        .iter()
        .enumerate()
        .map(|(i, (name, family))| (format!("p{}", i + 1), name.to_string(), *family))
        .collect();
    let products_version = db::catalogs::create_products_catalog(&mut conn, &entries)
        .await
        .unwrap();
    db::catalogs::activate_products(&mut conn, products_version)
        .await
        .unwrap();

    let route_norms: Vec<String> = routes.iter().map(|r| r.to_string()).collect();
    let routes_version = db::catalogs::create_routes_catalog(&mut conn, &route_norms)
        .await
        .unwrap();
    db::catalogs::activate_routes(&mut conn, routes_version)
        .await
        .unwrap();
}

/// Open a shift through the shift manager (no ingest wired)
pub async fn open_shift(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    slot: &str,
    date: &str,
) -> Shift {
    shifts::open_shift(pool, publisher, None, slot, date, Some("tester"))
        .await
        .expect("open shift")
}

/// Enable one operator for one functional code in the shift
pub async fn qualify(pool: &SqlitePool, shift_id: Uuid, user: &str, functional_code: i64) {
    let mut conn = pool.acquire().await.unwrap();
    db::shifts::set_qualification(&mut conn, shift_id, user, functional_code, true)
        .await
        .unwrap();
}

/// Raw RFC 822 bytes for one test email
pub fn raw_email(subject: &str, body: &str) -> Vec<u8> {
    format!(
        "Subject: {}\r\nFrom: pedidos@example.com\r\n\r\n{}",
        subject, body
    )
    .into_bytes()
}

/// In-memory mailbox driving the real ingest service
pub struct FakeMailSource {
    uidvalidity: AtomicU32,
    messages: Mutex<Vec<RawMessage>>,
}

impl FakeMailSource {
    pub fn new(uidvalidity: u32) -> Self {
        Self {
            uidvalidity: AtomicU32::new(uidvalidity),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn deliver(&self, uid: u32, subject: &str, body: &str) {
        self.messages.lock().unwrap().push(RawMessage {
            uid,
            raw: raw_email(subject, body),
        });
    }

    pub fn deliver_raw(&self, uid: u32, raw: Vec<u8>) {
        self.messages.lock().unwrap().push(RawMessage { uid, raw });
    }

    /// Simulate a mailbox rebuild: new uidvalidity, messages renumbered
    pub fn reset_uidvalidity(&self, uidvalidity: u32) {
        self.uidvalidity.store(uidvalidity, Ordering::SeqCst);
    }
}

#[async_trait]
impl MailSource for FakeMailSource {
    async fn check_mailbox(&self) -> Result<u32> {
        Ok(self.uidvalidity.load(Ordering::SeqCst))
    }

    async fn fetch_after(&self, last_uid: u32) -> Result<Vec<RawMessage>> {
        let mut messages: Vec<RawMessage> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.uid > last_uid)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    async fn disconnect(&self) {}
}

/// Ingest service wired to a fake mailbox
pub fn ingest_service(
    pool: &SqlitePool,
    publisher: &EventPublisher,
    source: Arc<FakeMailSource>,
) -> IngestService {
    IngestService::new(
        pool.clone(),
        publisher.clone(),
        source,
        "INBOX".to_string(),
        80.0,
    )
}

/// Event types in append order
pub async fn event_types(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT event_type FROM events ORDER BY id ASC")
        .fetch_all(pool)
        .await
        .unwrap()
}

pub async fn count_events(pool: &SqlitePool, event_type: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE event_type = ?")
        .bind(event_type)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Rows of the lines table for a shift, in lote order
pub struct LineRow {
    pub line_id: Uuid,
    pub product_norm: String,
    pub family: i64,
    pub match_method: Option<String>,
    pub match_score: Option<f64>,
    pub operator: Option<String>,
    pub printed_at: Option<String>,
    pub print_count: i64,
    pub quantity: f64,
    pub unit_raw: String,
    pub client_name: String,
}

pub async fn lines_for_shift(pool: &SqlitePool, shift_id: Uuid) -> Vec<LineRow> {
    use sqlx::Row;
    let rows = sqlx::query(
        r#"
        SELECT li.id AS line_id, li.product_norm, li.family, li.match_method, li.match_score,
               li.operator, li.printed_at, li.print_count, li.quantity, li.unit_raw,
               co.name_raw AS client_name
        FROM lines li
        JOIN client_orders co ON li.client_order_id = co.id
        JOIN lotes l ON co.lote_id = l.id
        WHERE l.shift_id = ?
        ORDER BY l.created_at, l.id, co.created_at, co.id, li.seq_in_client
        "#,
    )
    .bind(shift_id.to_string())
    .fetch_all(pool)
    .await
    .unwrap();

    rows.into_iter()
        .map(|row| LineRow {
            line_id: Uuid::parse_str(row.get::<String, _>("line_id").as_str()).unwrap(),
            product_norm: row.get("product_norm"),
            family: row.get("family"),
            match_method: row.get("match_method"),
            match_score: row.get("match_score"),
            operator: row.get("operator"),
            printed_at: row.get("printed_at"),
            print_count: row.get("print_count"),
            quantity: row.get("quantity"),
            unit_raw: row.get("unit_raw"),
            client_name: row.get("client_name"),
        })
        .collect()
}

pub async fn lote_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM lotes")
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Reset the persisted ingest cursor to uid zero, keeping uidvalidity
pub async fn rewind_cursor(pool: &SqlitePool) {
    sqlx::query("UPDATE imap_cursor SET last_uid = 0")
        .execute(pool)
        .await
        .unwrap();
}
