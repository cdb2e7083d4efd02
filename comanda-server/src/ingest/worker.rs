//! The ingest service and its polling worker.
//!
//! One long-running task owns the mailbox. Each cycle is serialized by a
//! mutex so the ticking loop, the force-poll endpoint and the shift-open
//! backlog poll never overlap. Transport failures back off exponentially
//! (1 s doubling to 60 s, reset on a successful cycle); a single bad
//! message becomes an ERROR_PARSE lote and never stalls the mailbox.

use super::message::{header_value, split_raw_message};
use super::source::MailSource;
use crate::publisher::EventPublisher;
use crate::{db, processor};
use chrono::{DateTime, Utc};
use comanda_common::events::DispatchEvent;
use comanda_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Snapshot served by `GET /api/imap/status`
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStatus {
    pub running: bool,
    pub connected: bool,
    pub last_error: Option<String>,
    pub last_poll_at: Option<DateTime<Utc>>,
}

/// Result of one poll cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct PollOutcome {
    /// True when no shift was active and no fetch happened
    pub skipped: bool,
    pub fetched: usize,
    pub new_lotes: usize,
    pub duplicates: usize,
}

pub struct IngestService {
    pool: SqlitePool,
    publisher: EventPublisher,
    source: Arc<dyn MailSource>,
    mailbox: String,
    fuzzy_threshold: f64,
    status: RwLock<IngestStatus>,
    poll_lock: Mutex<()>,
}

impl IngestService {
    pub fn new(
        pool: SqlitePool,
        publisher: EventPublisher,
        source: Arc<dyn MailSource>,
        mailbox: String,
        fuzzy_threshold: f64,
    ) -> Self {
        Self {
            pool,
            publisher,
            source,
            mailbox,
            fuzzy_threshold,
            status: RwLock::new(IngestStatus::default()),
            poll_lock: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> IngestStatus {
        self.status.read().await.clone()
    }

    pub async fn cursor(&self) -> Result<db::imap_cursor::ImapCursor> {
        let mut conn = self.pool.acquire().await?;
        db::imap_cursor::get(&mut conn, &self.mailbox).await
    }

    /// Run one poll cycle now. Serialized against the ticking loop.
    pub async fn poll_now(&self) -> Result<PollOutcome> {
        let _guard = self.poll_lock.lock().await;
        let result = self.poll_cycle().await;

        let mut status = self.status.write().await;
        status.last_poll_at = Some(Utc::now());
        match &result {
            Ok(_) => {
                status.last_error = None;
            }
            Err(e) => {
                status.connected = false;
                status.last_error = Some(e.to_string());
            }
        }

        result
    }

    async fn poll_cycle(&self) -> Result<PollOutcome> {
        let mut outcome = PollOutcome::default();
        let now = Utc::now();

        // No fetch without an active shift; only the poll stamp moves.
        let active = {
            let mut conn = self.pool.acquire().await?;
            let active = db::shifts::active_shift(&mut conn).await?;
            if active.is_none() {
                db::imap_cursor::touch_poll(&mut conn, &self.mailbox, now).await?;
            }
            active
        };
        let Some(shift) = active else {
            debug!("poll skipped: no active shift");
            outcome.skipped = true;
            return Ok(outcome);
        };

        let uidvalidity = self.source.check_mailbox().await?;
        self.status.write().await.connected = true;

        let cursor = {
            let mut conn = self.pool.acquire().await?;
            db::imap_cursor::get(&mut conn, &self.mailbox).await?
        };

        let mut last_uid = cursor.last_uid.max(0) as u32;
        match cursor.uidvalidity {
            Some(stored) if stored != uidvalidity as i64 => {
                // Mailbox was rebuilt; start over from UID zero.
                warn!(
                    stored,
                    current = uidvalidity,
                    "UIDVALIDITY changed, resetting ingest cursor"
                );
                last_uid = 0;
            }
            _ => {}
        }

        let messages = self.source.fetch_after(last_uid).await?;
        outcome.fetched = messages.len();

        let mut new_lote_ids: Vec<Uuid> = Vec::new();
        for message in messages {
            match self
                .ingest_message(shift.id, uidvalidity, message.uid, &message.raw, now)
                .await?
            {
                IngestOutcome::New(lote_id) => {
                    outcome.new_lotes += 1;
                    new_lote_ids.push(lote_id);
                }
                IngestOutcome::Duplicate => outcome.duplicates += 1,
                IngestOutcome::Error => {}
            }
            last_uid = last_uid.max(message.uid);
        }

        {
            let mut conn = self.pool.acquire().await?;
            db::imap_cursor::upsert(
                &mut conn,
                &self.mailbox,
                last_uid as i64,
                Some(uidvalidity as i64),
                now,
            )
            .await?;
        }

        // Hand the freshly stored lotes to the pipeline, in arrival order.
        for lote_id in new_lote_ids {
            processor::process_lote(&self.pool, &self.publisher, self.fuzzy_threshold, lote_id)
                .await?;
        }

        Ok(outcome)
    }

    async fn ingest_message(
        &self,
        shift_id: Uuid,
        uidvalidity: u32,
        uid: u32,
        raw: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        match split_raw_message(raw) {
            Ok((headers, body)) => {
                let subject = header_value(&headers, "Subject").unwrap_or_default();

                let mut tx = self.pool.begin().await?;
                let inserted = db::lotes::insert_from_imap(
                    &mut tx,
                    shift_id,
                    uidvalidity,
                    uid,
                    received_at,
                    &subject,
                    &body,
                )
                .await?;

                let (staged, outcome) = match inserted {
                    Some(lote_id) => (
                        db::events::append(
                            &mut tx,
                            &DispatchEvent::NewEmail {
                                lote_id,
                                imap_uid: uid,
                                subject,
                            },
                            None,
                        )
                        .await?,
                        IngestOutcome::New(lote_id),
                    ),
                    None => (
                        db::events::append(
                            &mut tx,
                            &DispatchEvent::DuplicateIgnored {
                                imap_uidvalidity: uidvalidity,
                                imap_uid: uid,
                            },
                            None,
                        )
                        .await?,
                        IngestOutcome::Duplicate,
                    ),
                };

                tx.commit().await?;
                self.publisher.broadcast_all(vec![staged]);
                Ok(outcome)
            }
            Err(extract_err) => {
                // The message slot must not stall the mailbox: absorb it
                // as an error lote and keep the cursor moving.
                warn!(uid, error = %extract_err, "message extraction failed");
                let mut tx = self.pool.begin().await?;
                let inserted = db::lotes::insert_error_lote(
                    &mut tx,
                    shift_id,
                    uidvalidity,
                    uid,
                    &extract_err.to_string(),
                )
                .await?;

                let staged = match inserted {
                    Some(lote_id) => Some(
                        db::events::append(
                            &mut tx,
                            &DispatchEvent::EmailReadError {
                                lote_id,
                                imap_uid: uid,
                                error: extract_err.to_string(),
                            },
                            None,
                        )
                        .await?,
                    ),
                    None => None,
                };

                tx.commit().await?;
                if let Some(staged) = staged {
                    self.publisher.broadcast_all(vec![staged]);
                }
                Ok(IngestOutcome::Error)
            }
        }
    }

    async fn set_running(&self, running: bool) {
        self.status.write().await.running = running;
    }
}

enum IngestOutcome {
    New(Uuid),
    Duplicate,
    Error,
}

/// Spawn the polling loop. The worker ticks at `poll_interval`, backs off
/// on transport errors, and logs out on shutdown.
pub fn spawn_ingest_worker(
    service: Arc<IngestService>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        service.set_running(true).await;
        info!(interval = ?poll_interval, "ingest worker started");

        let mut backoff = BACKOFF_INITIAL;
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match service.poll_now().await {
                        Ok(outcome) => {
                            backoff = BACKOFF_INITIAL;
                            if outcome.fetched > 0 {
                                debug!(
                                    fetched = outcome.fetched,
                                    new = outcome.new_lotes,
                                    duplicates = outcome.duplicates,
                                    "poll cycle complete"
                                );
                            }
                        }
                        Err(e) => {
                            error!(error = %e, retry_in = ?backoff, "poll cycle failed");
                            // Wait out the backoff, still responsive to stop.
                            tokio::select! {
                                _ = tokio::time::sleep(backoff) => {}
                                _ = shutdown.changed() => {}
                            }
                            backoff = (backoff * 2).min(BACKOFF_MAX);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Teardown waits for any in-flight poll before logging out.
        let _in_flight = service.poll_lock.lock().await;
        service.source.disconnect().await;
        service.set_running(false).await;
        info!("ingest worker stopped");
    })
}
