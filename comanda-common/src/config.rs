//! Environment-driven configuration.
//!
//! Everything the server needs comes from the environment, resolved once
//! at startup. CLI flags may override the bind address and database URL.

use crate::{Error, Result};

/// IMAP mailbox connection settings
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub folder: String,
    pub poll_seconds: u64,
    pub secure: bool,
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// None when IMAP_HOST is unset; the ingest worker is not started then
    pub imap: Option<ImapConfig>,
    /// Fuzzy product-match threshold on the 0–100 ratio scale
    pub fuzzy_match_threshold: f64,
    /// Directory receiving rendered comanda blobs
    pub pdf_dir: String,
    /// Per-request deadline in seconds; a stuck DB call cannot hold a
    /// request longer than this
    pub request_deadline_seconds: u64,
    /// How long graceful shutdown waits for open connections to drain
    pub drain_seconds: u64,
}

impl Config {
    /// Resolve configuration from the process environment
    pub fn from_env() -> Result<Self> {
        let database_url = env_or("DATABASE_URL", "sqlite://comanda.db?mode=rwc");
        let bind_addr = env_or("BIND_ADDR", "127.0.0.1:8420");

        let imap = match std::env::var("IMAP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(ImapConfig {
                host,
                port: parse_env("IMAP_PORT", 993)?,
                user: std::env::var("IMAP_USER")
                    .map_err(|_| Error::Config("IMAP_USER is required when IMAP_HOST is set".to_string()))?,
                password: std::env::var("IMAP_PASSWORD")
                    .map_err(|_| Error::Config("IMAP_PASSWORD is required when IMAP_HOST is set".to_string()))?,
                folder: env_or("IMAP_FOLDER", "INBOX"),
                poll_seconds: parse_env("IMAP_POLL_SECONDS", 15)?,
                secure: parse_env("IMAP_SECURE", true)?,
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            bind_addr,
            imap,
            fuzzy_match_threshold: parse_env("FUZZY_MATCH_THRESHOLD", 80.0)?,
            pdf_dir: env_or("PDF_DIR", "./comandas"),
            request_deadline_seconds: parse_env("REQUEST_DEADLINE_SECONDS", 10)?,
            drain_seconds: parse_env("SHUTDOWN_DRAIN_SECONDS", 30)?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|_| Error::Config(format!("Invalid value for {}: {}", key, raw))),
        _ => Ok(default),
    }
}
