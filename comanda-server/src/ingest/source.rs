//! Mailbox transport seam.
//!
//! The worker speaks to the mailbox only through `MailSource`, so tests
//! drive the whole ingest path with an in-memory fake. The production
//! implementation keeps one IMAP4rev1 session behind a mutex and runs the
//! blocking protocol calls on the blocking thread pool; any protocol error
//! drops the session and the next call reconnects.

use async_trait::async_trait;
use comanda_common::config::ImapConfig;
use comanda_common::{Error, Result};
use std::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One fetched message, raw RFC 822 source included
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub raw: Vec<u8>,
}

#[async_trait]
pub trait MailSource: Send + Sync {
    /// Select the folder and report its current UIDVALIDITY
    async fn check_mailbox(&self) -> Result<u32>;

    /// Messages with `uid > last_uid`, ascending
    async fn fetch_after(&self, last_uid: u32) -> Result<Vec<RawMessage>>;

    /// Log out and drop the connection; called on graceful stop
    async fn disconnect(&self);
}

enum MailSession {
    Tls(imap::Session<native_tls::TlsStream<TcpStream>>),
    Plain(imap::Session<TcpStream>),
}

impl MailSession {
    fn connect(config: &ImapConfig) -> Result<Self> {
        if config.secure {
            let tls = native_tls::TlsConnector::builder()
                .build()
                .map_err(|e| Error::Internal(format!("TLS setup: {}", e)))?;
            let client = imap::connect(
                (config.host.as_str(), config.port),
                config.host.as_str(),
                &tls,
            )
            .map_err(|e| Error::Internal(format!("IMAP connect: {}", e)))?;
            let session = client
                .login(&config.user, &config.password)
                .map_err(|(e, _)| Error::Internal(format!("IMAP login: {}", e)))?;
            info!(host = %config.host, "IMAP session established (TLS)");
            Ok(MailSession::Tls(session))
        } else {
            let stream = TcpStream::connect((config.host.as_str(), config.port))?;
            let client = imap::Client::new(stream);
            let session = client
                .login(&config.user, &config.password)
                .map_err(|(e, _)| Error::Internal(format!("IMAP login: {}", e)))?;
            info!(host = %config.host, "IMAP session established (plain)");
            Ok(MailSession::Plain(session))
        }
    }

    fn select(&mut self, folder: &str) -> imap::error::Result<imap::types::Mailbox> {
        match self {
            MailSession::Tls(s) => s.select(folder),
            MailSession::Plain(s) => s.select(folder),
        }
    }

    fn uid_fetch_raw(&mut self, range: &str) -> imap::error::Result<Vec<(u32, Vec<u8>)>> {
        let fetches = match self {
            MailSession::Tls(s) => s.uid_fetch(range, "(UID RFC822)")?,
            MailSession::Plain(s) => s.uid_fetch(range, "(UID RFC822)")?,
        };

        let mut out = Vec::new();
        for fetch in fetches.iter() {
            if let (Some(uid), Some(source)) = (fetch.uid, fetch.body()) {
                out.push((uid, source.to_vec()));
            }
        }
        Ok(out)
    }

    fn logout(&mut self) {
        let _ = match self {
            MailSession::Tls(s) => s.logout(),
            MailSession::Plain(s) => s.logout(),
        };
    }
}

/// Production mailbox transport over one IMAP connection
pub struct ImapMailSource {
    config: ImapConfig,
    session: Mutex<Option<MailSession>>,
}

impl ImapMailSource {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Run one blocking protocol call against the (re)connected session.
    /// On error the session is dropped so the next call reconnects.
    async fn with_session<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut MailSession) -> imap::error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.session.lock().await;

        let session = match guard.take() {
            Some(existing) => existing,
            None => {
                let config = self.config.clone();
                tokio::task::spawn_blocking(move || MailSession::connect(&config))
                    .await
                    .map_err(|e| Error::Internal(format!("connect task: {}", e)))??
            }
        };

        let (session, result) = tokio::task::spawn_blocking(move || {
            let mut session = session;
            let result = op(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| Error::Internal(format!("IMAP task: {}", e)))?;

        match result {
            Ok(value) => {
                *guard = Some(session);
                Ok(value)
            }
            Err(e) => {
                // Session state is unknown after a protocol error.
                debug!(error = %e, "dropping IMAP session after error");
                Err(Error::Internal(format!("IMAP: {}", e)))
            }
        }
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn check_mailbox(&self) -> Result<u32> {
        let folder = self.config.folder.clone();
        let mailbox = self
            .with_session(move |session| session.select(&folder))
            .await?;

        mailbox
            .uid_validity
            .ok_or_else(|| Error::Internal("server reported no UIDVALIDITY".to_string()))
    }

    async fn fetch_after(&self, last_uid: u32) -> Result<Vec<RawMessage>> {
        let range = format!("{}:*", last_uid.saturating_add(1));
        let fetched = self
            .with_session(move |session| session.uid_fetch_raw(&range))
            .await?;

        // `n:*` returns the last message even when n exceeds it; filter
        // and order client-side.
        let mut messages: Vec<RawMessage> = fetched
            .into_iter()
            .filter(|(uid, _)| *uid > last_uid)
            .map(|(uid, raw)| RawMessage { uid, raw })
            .collect();
        messages.sort_by_key(|m| m.uid);

        Ok(messages)
    }

    async fn disconnect(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let mut session = session;
                session.logout();
            })
            .await;
            info!("IMAP session closed");
        }
    }
}
