//! HTTP server: application state, router, per-request deadline,
//! graceful shutdown with a bounded drain.

use crate::api;
use crate::error::ApiError;
use crate::ingest::IngestService;
use crate::printing::render::{ComandaRenderer, PdfStore};
use crate::publisher::EventPublisher;
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Application state shared by every handler
pub struct AppState {
    pub pool: SqlitePool,
    pub publisher: EventPublisher,
    pub ingest: Option<Arc<IngestService>>,
    pub renderer: Arc<dyn ComandaRenderer>,
    pub pdf_store: PdfStore,
    /// Flips to true on SIGINT/SIGTERM; long-lived streams watch it
    pub shutdown: watch::Receiver<bool>,
}

/// Bound every request so a stuck DB call cannot hold it open past the
/// configured deadline
async fn request_deadline(
    State(deadline): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(deadline = ?deadline, "request deadline exceeded");
            ApiError::Internal("request deadline exceeded".to_string()).into_response()
        }
    }
}

/// Build the full router. The SSE stream lives outside the deadline
/// layer; it is a long-lived tail, not a bounded request.
pub fn router(state: Arc<AppState>, deadline: Duration) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/api/shifts/open", post(api::shifts::open_shift))
        .route("/api/shifts/:id/close", post(api::shifts::close_shift))
        .route("/api/shifts/active", get(api::shifts::active_shift))
        .route("/api/routes", get(api::routes::list_routes))
        .route(
            "/api/routes/:route_id/mark-collected",
            post(api::routes::mark_collected),
        )
        .route(
            "/api/print/routes/:route_id/operator/enter",
            post(api::print::operator_enter),
        )
        .route(
            "/api/print/routes/:route_id/operator/print-initial",
            post(api::print::operator_print_initial),
        )
        .route(
            "/api/print/routes/:route_id/operator/print-new",
            post(api::print::operator_print_new),
        )
        .route(
            "/api/print/routes/:route_id/collector/print-new",
            post(api::print::collector_print_new),
        )
        .route("/api/print/jobs/:job_id/reprint", post(api::print::reprint_job))
        .route("/api/events", get(api::events::event_history))
        .route("/api/imap/status", get(api::imap::imap_status))
        .route("/api/imap/force-poll", post(api::imap::force_poll))
        .layer(middleware::from_fn_with_state(deadline, request_deadline));

    let stream = Router::new().route("/api/events/stream", get(api::sse::event_stream));

    api.merge(stream).with_state(state)
}

/// Serve until the shutdown flag flips, then drain open connections for
/// at most `drain` before dropping them
pub async fn start(
    bind_addr: &str,
    state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
    deadline: Duration,
    drain: Duration,
) -> anyhow::Result<()> {
    let app = router(state, deadline);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("HTTP server listening on {}", bind_addr);

    let mut graceful_rx = shutdown.clone();
    let mut drain_rx = shutdown;

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = graceful_rx.changed().await;
        info!("HTTP server draining");
    });

    tokio::select! {
        result = server => {
            result?;
        }
        _ = async {
            let _ = drain_rx.changed().await;
            tokio::time::sleep(drain).await;
        } => {
            warn!(deadline = ?drain, "drain deadline elapsed, dropping open connections");
        }
    }

    Ok(())
}

/// Health check endpoint
async fn health(State(_state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "comanda-server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}
