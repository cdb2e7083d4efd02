//! Event types and in-process bus.
//!
//! Every state change the wall display cares about is described here.
//! Events are appended to the persistent log first (the log assigns id and
//! timestamp) and then fanned out on a `tokio::broadcast` bus; a slow
//! subscriber lags and drops, it never blocks the writer. The persistent
//! log remains the source of truth for replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Domain events published by the dispatch core.
///
/// Serialized with a `type` tag in SCREAMING_SNAKE_CASE; the serialized
/// form is the event payload stored in the log and streamed over SSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchEvent {
    /// A shift was opened and is now the single ACTIVE shift
    ShiftStarted {
        shift_id: Uuid,
        date: String,
        slot: String,
        started_at: DateTime<Utc>,
        scheduled_end_at: DateTime<Utc>,
    },

    /// A shift was closed manually
    ShiftClosed {
        shift_id: Uuid,
        ended_at: DateTime<Utc>,
    },

    /// The auto-closer closed a shift past its scheduled end
    ShiftClosedAuto {
        shift_id: Uuid,
        scheduled_end_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    },

    /// A new message was materialized as a raw lote
    NewEmail {
        lote_id: Uuid,
        imap_uid: u32,
        subject: String,
    },

    /// A message could not be extracted; an error lote preserves the slot
    EmailReadError {
        lote_id: Uuid,
        imap_uid: u32,
        error: String,
    },

    /// A message with an already-ingested `(uidvalidity, uid)` was skipped
    DuplicateIgnored {
        imap_uidvalidity: u32,
        imap_uid: u32,
    },

    /// The subject did not resolve against the active routes catalog
    RouteParseError {
        lote_id: Uuid,
        route_norm: String,
    },

    /// The body yielded no clients
    BodyParseError {
        lote_id: Uuid,
        detail: String,
    },

    /// A product line matched nothing; the line lands in the catch-all family
    ProductNotFound {
        lote_id: Uuid,
        product_raw: String,
        product_norm: String,
    },

    /// A product line matched below 1.0 but above the fuzzy threshold
    ProductFuzzyMatch {
        lote_id: Uuid,
        product_raw: String,
        matched_norm: String,
        score: f64,
    },

    /// No operator is qualified for the functional code in this shift
    EmptyOperatorPool {
        lote_id: Uuid,
        functional_code: i64,
    },

    /// A lote ran the full pipeline and is marked OK
    LoteProcessed {
        lote_id: Uuid,
        route_norm: String,
        clients: usize,
        lines: usize,
    },

    /// The pipeline hit an unexpected error; the transaction was rolled back
    LoteProcessError {
        lote_id: Uuid,
        error: String,
    },

    /// Unprinted work was copied into a newly opened shift
    LoteCarriedOver {
        source_lote_id: Uuid,
        new_lote_id: Uuid,
        lines: usize,
    },

    /// A route transitioned into RED (alert)
    RouteAlertRed {
        route_day_id: Uuid,
        route_norm: String,
        unprinted: i64,
    },

    /// A route transitioned into GREEN (all lines printed)
    RouteCompleteGreen {
        route_day_id: Uuid,
        route_norm: String,
    },

    /// The collector marked a route as collected
    RouteCollected {
        route_day_id: Uuid,
        route_norm: String,
    },

    /// An operator entered a route for the first time; the cutoff snapshot
    /// was taken
    OperatorEnteredRoute {
        route_day_id: Uuid,
        route_norm: String,
        operator: String,
        cutoff_lote: Option<Uuid>,
    },

    /// A print job committed and the included lines were stamped
    PrintEmitted {
        job_id: Uuid,
        route_norm: String,
        kind: String,
        lines: usize,
    },

    /// A products catalog version became the active one
    ProductsActivated {
        version: i64,
    },

    /// A routes catalog version became the active one
    RoutesActivated {
        version: i64,
    },
}

impl DispatchEvent {
    /// Event type as the wire string (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            DispatchEvent::ShiftStarted { .. } => "SHIFT_STARTED",
            DispatchEvent::ShiftClosed { .. } => "SHIFT_CLOSED",
            DispatchEvent::ShiftClosedAuto { .. } => "SHIFT_CLOSED_AUTO",
            DispatchEvent::NewEmail { .. } => "NEW_EMAIL",
            DispatchEvent::EmailReadError { .. } => "EMAIL_READ_ERROR",
            DispatchEvent::DuplicateIgnored { .. } => "DUPLICATE_IGNORED",
            DispatchEvent::RouteParseError { .. } => "ROUTE_PARSE_ERROR",
            DispatchEvent::BodyParseError { .. } => "BODY_PARSE_ERROR",
            DispatchEvent::ProductNotFound { .. } => "PRODUCT_NOT_FOUND",
            DispatchEvent::ProductFuzzyMatch { .. } => "PRODUCT_FUZZY_MATCH",
            DispatchEvent::EmptyOperatorPool { .. } => "EMPTY_OPERATOR_POOL",
            DispatchEvent::LoteProcessed { .. } => "LOTE_PROCESSED",
            DispatchEvent::LoteProcessError { .. } => "LOTE_PROCESS_ERROR",
            DispatchEvent::LoteCarriedOver { .. } => "LOTE_CARRIED_OVER",
            DispatchEvent::RouteAlertRed { .. } => "ROUTE_ALERT_RED",
            DispatchEvent::RouteCompleteGreen { .. } => "ROUTE_COMPLETE_GREEN",
            DispatchEvent::RouteCollected { .. } => "ROUTE_COLLECTED",
            DispatchEvent::OperatorEnteredRoute { .. } => "OPERATOR_ENTERED_ROUTE",
            DispatchEvent::PrintEmitted { .. } => "PRINT_EMITTED",
            DispatchEvent::ProductsActivated { .. } => "PRODUCTS_ACTIVATED",
            DispatchEvent::RoutesActivated { .. } => "ROUTES_ACTIVATED",
        }
    }

    /// Entity the event is about, as an `(entity_type, entity_id)` pair
    pub fn entity(&self) -> (&'static str, String) {
        match self {
            DispatchEvent::ShiftStarted { shift_id, .. }
            | DispatchEvent::ShiftClosed { shift_id, .. }
            | DispatchEvent::ShiftClosedAuto { shift_id, .. } => {
                ("shift", shift_id.to_string())
            }
            DispatchEvent::NewEmail { lote_id, .. }
            | DispatchEvent::EmailReadError { lote_id, .. }
            | DispatchEvent::RouteParseError { lote_id, .. }
            | DispatchEvent::BodyParseError { lote_id, .. }
            | DispatchEvent::ProductNotFound { lote_id, .. }
            | DispatchEvent::ProductFuzzyMatch { lote_id, .. }
            | DispatchEvent::EmptyOperatorPool { lote_id, .. }
            | DispatchEvent::LoteProcessed { lote_id, .. }
            | DispatchEvent::LoteProcessError { lote_id, .. } => {
                ("lote", lote_id.to_string())
            }
            DispatchEvent::DuplicateIgnored { imap_uid, .. } => {
                ("lote", imap_uid.to_string())
            }
            DispatchEvent::LoteCarriedOver { new_lote_id, .. } => {
                ("lote", new_lote_id.to_string())
            }
            DispatchEvent::RouteAlertRed { route_day_id, .. }
            | DispatchEvent::RouteCompleteGreen { route_day_id, .. }
            | DispatchEvent::RouteCollected { route_day_id, .. }
            | DispatchEvent::OperatorEnteredRoute { route_day_id, .. } => {
                ("route_day", route_day_id.to_string())
            }
            DispatchEvent::PrintEmitted { job_id, .. } => {
                ("print_job", job_id.to_string())
            }
            DispatchEvent::ProductsActivated { version } => {
                ("products_catalog", version.to_string())
            }
            DispatchEvent::RoutesActivated { version } => {
                ("routes_catalog", version.to_string())
            }
        }
    }
}

/// One appended row of the event log, as delivered to subscribers and
/// streamed over SSE. `id` is the log sequence, `ts` is assigned at append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
}

/// In-process fan-out for appended events.
///
/// Backed by `tokio::broadcast`: publishing never blocks, a subscriber that
/// falls behind the bounded buffer drops events (the persistent log still
/// has them for replay).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoredEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all events appended after this call
    pub fn subscribe(&self) -> broadcast::Receiver<StoredEvent> {
        self.tx.subscribe()
    }

    /// Fan an appended event out to subscribers, ignoring "no subscribers"
    pub fn emit_lossy(&self, event: StoredEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
