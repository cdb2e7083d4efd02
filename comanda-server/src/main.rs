//! comanda-server entry point: wiring, workers, HTTP.

use clap::Parser;
use comanda_common::config::Config;
use comanda_common::events::EventBus;
use comanda_server::ingest::{spawn_ingest_worker, ImapMailSource, IngestService};
use comanda_server::printing::render::{PdfStore, PlainTextRenderer};
use comanda_server::publisher::EventPublisher;
use comanda_server::server::{self, AppState};
use comanda_server::shifts::spawn_auto_closer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EVENT_BUS_CAPACITY: usize = 256;
const AUTO_CLOSER_PERIOD: Duration = Duration::from_secs(30);

/// Order-dispatch back-end: IMAP ingest, batch pipeline, print engine, SSE
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP server to (overrides BIND_ADDR)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("comanda_server={},comanda_common={}", log_level, log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("comanda-server starting...");

    let mut config = Config::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    let pool = comanda_common::db::init_database(&config.database_url).await?;

    let bus = EventBus::new(EVENT_BUS_CAPACITY);
    let publisher = EventPublisher::new(pool.clone(), bus);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let ingest = match &config.imap {
        Some(imap_config) => {
            let source = Arc::new(ImapMailSource::new(imap_config.clone()));
            let service = Arc::new(IngestService::new(
                pool.clone(),
                publisher.clone(),
                source,
                imap_config.folder.clone(),
                config.fuzzy_match_threshold,
            ));
            spawn_ingest_worker(
                service.clone(),
                Duration::from_secs(imap_config.poll_seconds),
                shutdown_rx.clone(),
            );
            Some(service)
        }
        None => {
            info!("IMAP_HOST not set, ingest worker disabled");
            None
        }
    };

    spawn_auto_closer(
        pool.clone(),
        publisher.clone(),
        AUTO_CLOSER_PERIOD,
        shutdown_rx.clone(),
    );

    let state = Arc::new(AppState {
        pool,
        publisher,
        ingest,
        renderer: Arc::new(PlainTextRenderer),
        pdf_store: PdfStore::new(&config.pdf_dir),
        shutdown: shutdown_rx.clone(),
    });

    server::start(
        &config.bind_addr,
        state,
        shutdown_rx,
        Duration::from_secs(config.request_deadline_seconds),
        Duration::from_secs(config.drain_seconds),
    )
    .await?;

    info!("comanda-server stopped");
    Ok(())
}
