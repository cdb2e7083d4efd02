//! Order-dispatch back-end for a food-distribution warehouse.
//!
//! Emails on one monitored mailbox become lotes; each lote is parsed,
//! matched against the versioned product catalog and assigned to
//! operators, routes track a visual state for the wall display, and
//! printable comandas are cut against per-operator and per-route cursors
//! that survive shift boundaries.

pub mod api;
pub mod assignment;
pub mod carryover;
pub mod catalogs;
pub mod db;
pub mod error;
pub mod ingest;
pub mod matcher;
pub mod pagination;
pub mod parser;
pub mod printing;
pub mod processor;
pub mod publisher;
pub mod route_state;
pub mod server;
pub mod shifts;
