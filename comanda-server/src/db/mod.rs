//! Per-entity database operations.
//!
//! Every function takes `&mut SqliteConnection` so the same code runs on a
//! pooled connection or inside a transaction; the batch pipeline leans on
//! that to keep all of its writes atomic.

pub mod assignment;
pub mod catalogs;
pub mod events;
pub mod imap_cursor;
pub mod lotes;
pub mod print_jobs;
pub mod progress;
pub mod route_days;
pub mod shifts;

use chrono::{DateTime, SecondsFormat, Utc};
use comanda_common::{Error, Result};

/// Timestamps are stored as RFC 3339 TEXT with millisecond precision so
/// lexicographic order equals chronological order.
pub fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad timestamp {:?}: {}", raw, e)))
}

pub fn parse_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(&s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_roundtrip_and_order() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(3);
        let (sa, sb) = (fmt_ts(a), fmt_ts(b));
        assert!(sa < sb, "text order must follow time order");
        assert_eq!(parse_ts(&sa).unwrap().timestamp_millis(), a.timestamp_millis());
    }
}
