//! IMAP ingest: mailbox transport, raw message extraction, and the
//! idempotent polling worker.

pub mod message;
pub mod source;
pub mod worker;

pub use source::{ImapMailSource, MailSource, RawMessage};
pub use worker::{spawn_ingest_worker, IngestService, IngestStatus, PollOutcome};
