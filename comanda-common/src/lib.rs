//! Shared types for the comanda dispatch back-end.
//!
//! Hosts the pieces every part of the system leans on: the common error
//! type, the text normalizer used by all matchers, the event definitions
//! and in-process bus, environment configuration, and the database schema.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod normalize;

pub use error::{Error, Result};
