//! Log replay at startup.
//!
//! Three passes over the log:
//! 1. Find the largest page number any record touches and cut the page file
//!    to it, discarding pages half-allocated during the crash.
//! 2. Redo every record of a transaction that is no longer active.
//! 3. Undo the records of still-active transactions, newest first within
//!    each transaction, then mark those transactions aborted.

use std::collections::BTreeMap;

use log::{debug, info};
use thiserror::Error;

use crate::storage::buffer::PageCache;
use crate::storage::error::StorageError;
use crate::storage::page::data_item;
use crate::storage::page::data_page::DataPage;
use crate::storage::wal::{InsertRecord, LogRecord, UpdateRecord, WalManager};
use crate::transaction::{TransactionError, TransactionId, TransactionManager};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Storage error during recovery: {0}")]
    Storage(#[from] StorageError),

    #[error("Transaction error during recovery: {0}")]
    Transaction(#[from] TransactionError),
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Recovery statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Number of records in the log.
    pub records_analyzed: usize,
    /// Page count the page file was truncated to.
    pub max_page_number: u32,
    /// Number of records redone.
    pub records_redone: usize,
    /// Number of records undone.
    pub records_undone: usize,
    /// Transactions found active and marked aborted.
    pub transactions_aborted: Vec<TransactionId>,
}

#[derive(Clone, Copy)]
enum Replay {
    Redo,
    Undo,
}

/// Bring the page file in line with the log.
pub fn recover(
    tm: &TransactionManager,
    wal: &WalManager,
    pc: &PageCache,
) -> RecoveryResult<RecoveryStats> {
    info!("Recovering...");
    let mut stats = RecoveryStats::default();

    let max_page_number = scan_max_page_number(wal, &mut stats)?;
    pc.truncate_by_page_number(max_page_number)?;
    stats.max_page_number = max_page_number;
    info!("Truncated page file to {} pages", max_page_number);

    redo_transactions(tm, wal, pc, &mut stats)?;
    info!("Redo finished: {} records", stats.records_redone);

    undo_transactions(tm, wal, pc, &mut stats)?;
    info!(
        "Undo finished: {} records, {} transactions aborted",
        stats.records_undone,
        stats.transactions_aborted.len()
    );

    info!("Recovery over");
    Ok(stats)
}

fn next_record(wal: &WalManager) -> RecoveryResult<Option<LogRecord>> {
    match wal.next()? {
        Some(data) => Ok(Some(LogRecord::decode(&data)?)),
        None => Ok(None),
    }
}

// Records of every transaction count here, undone ones included.
fn scan_max_page_number(wal: &WalManager, stats: &mut RecoveryStats) -> RecoveryResult<u32> {
    wal.rewind();
    let mut max_page_number = 0;
    while let Some(record) = next_record(wal)? {
        stats.records_analyzed += 1;
        max_page_number = max_page_number.max(record.page_id().0);
    }
    Ok(max_page_number.max(1))
}

fn redo_transactions(
    tm: &TransactionManager,
    wal: &WalManager,
    pc: &PageCache,
    stats: &mut RecoveryStats,
) -> RecoveryResult<()> {
    wal.rewind();
    while let Some(record) = next_record(wal)? {
        if tm.get_state(record.xid())?.is_finished() {
            apply(pc, record, Replay::Redo)?;
            stats.records_redone += 1;
        }
    }
    Ok(())
}

fn undo_transactions(
    tm: &TransactionManager,
    wal: &WalManager,
    pc: &PageCache,
    stats: &mut RecoveryStats,
) -> RecoveryResult<()> {
    // Transactions without records are still aborted below.
    let mut active: BTreeMap<TransactionId, Vec<LogRecord>> = tm
        .active_transactions()?
        .into_iter()
        .map(|xid| (xid, Vec::new()))
        .collect();
    if active.is_empty() {
        return Ok(());
    }

    wal.rewind();
    while let Some(record) = next_record(wal)? {
        if let Some(records) = active.get_mut(&record.xid()) {
            records.push(record);
        }
    }

    for (xid, records) in active {
        debug!("undoing {} records of {}", records.len(), xid);
        for record in records.into_iter().rev() {
            apply(pc, record, Replay::Undo)?;
            stats.records_undone += 1;
        }
        tm.abort(xid)?;
        stats.transactions_aborted.push(xid);
    }
    Ok(())
}

fn apply(pc: &PageCache, record: LogRecord, replay: Replay) -> RecoveryResult<()> {
    match record {
        LogRecord::Insert(InsertRecord {
            page_id,
            offset,
            mut raw,
            ..
        }) => {
            if let Replay::Undo = replay {
                data_item::set_raw_invalid(&mut raw);
            }
            let page = pc.get_page(page_id)?;
            {
                let mut data = page.data_mut();
                DataPage::from_data(&mut data).recover_insert(&raw, offset)?;
            }
            page.release()?;
        }
        LogRecord::Update(UpdateRecord {
            page_id,
            offset,
            old_raw,
            new_raw,
            ..
        }) => {
            let raw = match replay {
                Replay::Redo => new_raw,
                Replay::Undo => old_raw,
            };
            let page = pc.get_page(page_id)?;
            {
                let mut data = page.data_mut();
                DataPage::from_data(&mut data).recover_update(&raw, offset)?;
            }
            page.release()?;
        }
    }
    Ok(())
}
