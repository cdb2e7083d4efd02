//! Event publication: persist first, fan out second.
//!
//! `publish` is the one-shot path for code running outside a transaction.
//! The pipeline instead stages events with `db::events::append` on its own
//! transaction and hands the stored rows to `broadcast_all` after commit,
//! so the log never shows an event whose writes were rolled back.

use crate::db;
use comanda_common::events::{DispatchEvent, EventBus, StoredEvent};
use comanda_common::Result;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct EventPublisher {
    pool: SqlitePool,
    bus: EventBus,
}

impl EventPublisher {
    pub fn new(pool: SqlitePool, bus: EventBus) -> Self {
        Self { pool, bus }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Append one event to the log and fan it out
    pub async fn publish(&self, event: DispatchEvent) -> Result<StoredEvent> {
        self.publish_as(None, event).await
    }

    /// Append with actor attribution and fan out
    pub async fn publish_as(
        &self,
        actor: Option<&str>,
        event: DispatchEvent,
    ) -> Result<StoredEvent> {
        let mut conn = self.pool.acquire().await?;
        let stored = db::events::append(&mut conn, &event, actor).await?;
        self.bus.emit_lossy(stored.clone());
        Ok(stored)
    }

    /// Fan out events that were already appended inside a committed
    /// transaction
    pub fn broadcast_all(&self, staged: Vec<StoredEvent>) {
        for event in staged {
            self.bus.emit_lossy(event);
        }
    }
}
