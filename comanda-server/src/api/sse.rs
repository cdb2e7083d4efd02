//! SSE stream: replay-then-tail over the persisted event log.
//!
//! On connect the client's `Last-Event-ID` (an event id or an RFC 3339
//! timestamp) selects the replay window: up to 100 persisted events
//! strictly later, in order. The live tail attaches to the bus before the
//! replay query runs, and every live event at or below the replay
//! high-water mark is dropped, so nothing is delivered twice.

use crate::db;
use crate::db::events::EventRef;
use crate::server::AppState;
use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use comanda_common::events::StoredEvent;
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const REPLAY_CAP: i64 = 100;
const KEEPALIVE_SECS: u64 = 30;

fn parse_last_event_id(headers: &HeaderMap) -> Option<EventRef> {
    let raw = headers.get("last-event-id")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(id) = raw.parse::<i64>() {
        return Some(EventRef::Id(id));
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| EventRef::Ts(dt.with_timezone(&chrono::Utc)))
}

fn frame(event: &StoredEvent) -> Event {
    Event::default()
        .id(crate::db::fmt_ts(event.ts))
        .event("evento")
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
}

/// GET /api/events/stream
pub async fn event_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let after = parse_last_event_id(&headers);
    info!(resume = ?after, "SSE client connected");

    // Subscribe before reading the replay set so no event can fall into
    // the gap between the query and the tail.
    let mut rx = state.publisher.bus().subscribe();
    let mut shutdown = state.shutdown.clone();

    let replayed: Vec<StoredEvent> = {
        match state.pool.acquire().await {
            Ok(mut conn) => db::events::events_after(&mut conn, after, REPLAY_CAP)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "SSE replay query failed");
                    Vec::new()
                }),
            Err(e) => {
                warn!(error = %e, "SSE replay connection failed");
                Vec::new()
            }
        }
    };

    let stream = async_stream::stream! {
        let mut last_sent_id: i64 = 0;

        for event in &replayed {
            last_sent_id = last_sent_id.max(event.id);
            yield Ok(frame(event));
        }
        drop(replayed);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => {
                        // Deduplicate against the replay window.
                        if event.id <= last_sent_id {
                            continue;
                        }
                        last_sent_id = event.id;
                        yield Ok(frame(&event));
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        // The persistent log still has the dropped events;
                        // a client that cares reconnects with
                        // Last-Event-ID.
                        debug!(missed, "SSE subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    // A closed watch channel means teardown as well.
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("SSE stream closing on shutdown");
                        break;
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEPALIVE_SECS))
            .text("keepalive"),
    )
}
