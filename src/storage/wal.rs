//! Write-Ahead Logging (WAL) module.
//!
//! This module implements the write-ahead log for vibecore, providing:
//! - An append-only, checksummed log file with bad-tail truncation on open
//! - Sequential replay through a rewindable cursor
//! - Encoding of the insert and update records replayed by recovery

pub mod manager;
pub mod record;

pub use manager::WalManager;
pub use record::{InsertRecord, LogRecord, UpdateRecord};
