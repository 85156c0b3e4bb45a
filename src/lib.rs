//! FleetWatch: the monitoring core of a server-fleet health tracker.
//!
//! Remote reporters probe user-configured monitors and submit results; the
//! [`sentinel::Sentinel`] ingests them, aggregates availability and latency
//! over a short window, the current day and a rolling 30-day horizon,
//! persists compacted history and raises notifications on state changes.

pub mod config;
pub mod db;
pub mod i18n;
pub mod notify;
pub mod scheduler;
pub mod sentinel;

pub use config::SentinelConfig;
pub use sentinel::{ReportData, Sentinel, TaskResult};
