//! File-backed transaction status store.
//!
//! The `.xid` file holds an 8-byte big-endian counter of transactions ever
//! begun, followed by one status byte per transaction: xid `n` lives at byte
//! `8 + (n - 1)`.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::error;
use parking_lot::Mutex;
use thiserror::Error;

use super::id::{TransactionId, SUPER_XID};
use super::state::TransactionState;

const XID_HEADER_LENGTH: u64 = 8;

/// Error types for transaction operations.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Bad xid file: {0}")]
    BadXidFile(String),

    #[error("File already exists: {0:?}")]
    FileExists(PathBuf),

    #[error("File does not exist: {0:?}")]
    FileNotFound(PathBuf),

    #[error("Transaction {0} not found")]
    NotFound(TransactionId),

    #[error("Transaction {0} is in invalid state: {1}")]
    InvalidState(TransactionId, TransactionState),

    #[error("The super transaction cannot change state")]
    SuperTransaction,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

struct XidFile {
    file: File,
    /// Number of transactions ever begun; also the largest xid handed out.
    counter: u64,
}

impl XidFile {
    fn position(xid: TransactionId) -> u64 {
        XID_HEADER_LENGTH + (xid.value() - 1)
    }

    fn read_state(&mut self, xid: TransactionId) -> Result<TransactionState> {
        if xid.value() > self.counter {
            return Err(TransactionError::NotFound(xid));
        }
        self.file.seek(SeekFrom::Start(Self::position(xid)))?;
        let byte = self.file.read_u8()?;
        TransactionState::from_byte(byte).ok_or_else(|| {
            TransactionError::BadXidFile(format!("status byte {} for {}", byte, xid))
        })
    }

    fn write_state(&mut self, xid: TransactionId, state: TransactionState) -> Result<()> {
        self.file.seek(SeekFrom::Start(Self::position(xid)))?;
        self.file.write_all(&[state.to_byte()])?;
        self.file.sync_data()?;
        Ok(())
    }

    fn write_counter(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_u64::<BigEndian>(self.counter)?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Persists the state of every transaction.
pub struct TransactionManager {
    file: Mutex<XidFile>,
}

impl TransactionManager {
    /// Create a new `.xid` file with a zero counter. Fails if it exists.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => TransactionError::FileExists(path.to_path_buf()),
                _ => TransactionError::Io(e),
            })?;

        let mut xid_file = XidFile { file, counter: 0 };
        xid_file.write_counter()?;

        Ok(Self {
            file: Mutex::new(xid_file),
        })
    }

    /// Open an existing `.xid` file. The file length must match the counter
    /// in its header exactly.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => TransactionError::FileNotFound(path.to_path_buf()),
                _ => TransactionError::Io(e),
            })?;

        let len = file.metadata()?.len();
        if len < XID_HEADER_LENGTH {
            error!("xid file {:?} is shorter than its header", path);
            return Err(TransactionError::BadXidFile(format!(
                "file is {} bytes, shorter than the header",
                len
            )));
        }

        let mut header = [0u8; XID_HEADER_LENGTH as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let counter = u64::from_be_bytes(header);

        if XID_HEADER_LENGTH.checked_add(counter) != Some(len) {
            error!(
                "xid file {:?} holds {} bytes but its counter says {}",
                path, len, counter
            );
            return Err(TransactionError::BadXidFile(format!(
                "length {} does not match counter {}",
                len, counter
            )));
        }

        Ok(Self {
            file: Mutex::new(XidFile { file, counter }),
        })
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> Result<TransactionId> {
        let mut file = self.file.lock();
        let xid = TransactionId::new(file.counter + 1);
        file.write_state(xid, TransactionState::Active)?;
        file.counter += 1;
        file.write_counter()?;
        Ok(xid)
    }

    /// Commits a transaction.
    pub fn commit(&self, xid: TransactionId) -> Result<()> {
        self.finish(xid, TransactionState::Committed)
    }

    /// Aborts a transaction.
    pub fn abort(&self, xid: TransactionId) -> Result<()> {
        self.finish(xid, TransactionState::Aborted)
    }

    fn finish(&self, xid: TransactionId, state: TransactionState) -> Result<()> {
        if xid.is_super() {
            return Err(TransactionError::SuperTransaction);
        }
        let mut file = self.file.lock();
        let current = file.read_state(xid)?;
        if !current.is_active() {
            return Err(TransactionError::InvalidState(xid, current));
        }
        file.write_state(xid, state)
    }

    /// Gets the state of a transaction.
    pub fn get_state(&self, xid: TransactionId) -> Result<TransactionState> {
        if xid == SUPER_XID {
            return Ok(TransactionState::Committed);
        }
        self.file.lock().read_state(xid)
    }

    pub fn is_active(&self, xid: TransactionId) -> Result<bool> {
        Ok(self.get_state(xid)?.is_active())
    }

    pub fn is_committed(&self, xid: TransactionId) -> Result<bool> {
        Ok(self.get_state(xid)?.is_committed())
    }

    pub fn is_aborted(&self, xid: TransactionId) -> Result<bool> {
        Ok(self.get_state(xid)?.is_aborted())
    }

    /// Returns the total number of transactions ever begun.
    pub fn transaction_count(&self) -> u64 {
        self.file.lock().counter
    }

    /// Returns a list of all active transactions.
    pub fn active_transactions(&self) -> Result<Vec<TransactionId>> {
        let mut file = self.file.lock();
        let mut statuses = vec![0u8; file.counter as usize];
        file.file.seek(SeekFrom::Start(XID_HEADER_LENGTH))?;
        file.file.read_exact(&mut statuses)?;

        Ok(statuses
            .iter()
            .enumerate()
            .filter(|(_, byte)| **byte == TransactionState::Active.to_byte())
            .map(|(i, _)| TransactionId::new(i as u64 + 1))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_transaction_manager_begin() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = TransactionManager::create(&dir.path().join("test.xid"))?;

        let id1 = manager.begin()?;
        let id2 = manager.begin()?;

        assert_eq!(id1, TransactionId::new(1));
        assert_eq!(id2, TransactionId::new(2));
        assert_eq!(manager.transaction_count(), 2);
        assert_eq!(manager.active_transactions()?, vec![id1, id2]);

        assert!(manager.is_active(id1)?);
        assert!(!manager.is_committed(id1)?);
        assert!(!manager.is_aborted(id1)?);

        Ok(())
    }

    #[test]
    fn test_transaction_manager_commit() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = TransactionManager::create(&dir.path().join("test.xid"))?;

        let id = manager.begin()?;
        manager.commit(id)?;

        assert!(!manager.is_active(id)?);
        assert!(manager.is_committed(id)?);
        assert!(!manager.is_aborted(id)?);

        // Can't commit again
        assert!(matches!(
            manager.commit(id),
            Err(TransactionError::InvalidState(_, TransactionState::Committed))
        ));

        Ok(())
    }

    #[test]
    fn test_transaction_manager_abort() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = TransactionManager::create(&dir.path().join("test.xid"))?;

        let id = manager.begin()?;
        manager.abort(id)?;

        assert!(!manager.is_active(id)?);
        assert!(!manager.is_committed(id)?);
        assert!(manager.is_aborted(id)?);

        // Can't abort again, nor commit after abort
        assert!(manager.abort(id).is_err());
        assert!(manager.commit(id).is_err());

        Ok(())
    }

    #[test]
    fn test_super_transaction() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = TransactionManager::create(&dir.path().join("test.xid"))?;

        assert!(manager.is_committed(SUPER_XID)?);
        assert!(!manager.is_active(SUPER_XID)?);
        assert!(!manager.is_aborted(SUPER_XID)?);

        assert!(matches!(
            manager.abort(SUPER_XID),
            Err(TransactionError::SuperTransaction)
        ));
        assert!(matches!(
            manager.commit(SUPER_XID),
            Err(TransactionError::SuperTransaction)
        ));
        assert!(manager.is_committed(SUPER_XID)?);
        assert_eq!(manager.transaction_count(), 0);

        Ok(())
    }

    #[test]
    fn test_transaction_manager_not_found() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = TransactionManager::create(&dir.path().join("test.xid"))?;
        let fake_id = TransactionId::new(999);

        assert!(matches!(
            manager.get_state(fake_id),
            Err(TransactionError::NotFound(_))
        ));
        assert!(matches!(
            manager.commit(fake_id),
            Err(TransactionError::NotFound(_))
        ));

        Ok(())
    }

    #[test]
    fn test_state_survives_reopen() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.xid");

        let (committed, aborted, active) = {
            let manager = TransactionManager::create(&path)?;
            let committed = manager.begin()?;
            let aborted = manager.begin()?;
            let active = manager.begin()?;
            manager.commit(committed)?;
            manager.abort(aborted)?;
            (committed, aborted, active)
        };

        assert_eq!(fs::read(&path)?, vec![0, 0, 0, 0, 0, 0, 0, 3, 1, 2, 0]);

        let manager = TransactionManager::open(&path)?;
        assert_eq!(manager.transaction_count(), 3);
        assert!(manager.is_committed(committed)?);
        assert!(manager.is_aborted(aborted)?);
        assert!(manager.is_active(active)?);
        assert_eq!(manager.begin()?, TransactionId::new(4));

        Ok(())
    }

    #[test]
    fn test_length_mismatch_is_refused() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.xid");
        {
            let manager = TransactionManager::create(&path)?;
            manager.begin()?;
        }

        let mut bytes = fs::read(&path)?;
        bytes.push(0);
        fs::write(&path, &bytes)?;
        assert!(matches!(
            TransactionManager::open(&path),
            Err(TransactionError::BadXidFile(_))
        ));

        fs::write(&path, [0u8; 4])?;
        assert!(matches!(
            TransactionManager::open(&path),
            Err(TransactionError::BadXidFile(_))
        ));

        Ok(())
    }

    #[test]
    fn test_create_and_open_errors() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.xid");

        assert!(matches!(
            TransactionManager::open(&path),
            Err(TransactionError::FileNotFound(_))
        ));
        TransactionManager::create(&path)?;
        assert!(matches!(
            TransactionManager::create(&path),
            Err(TransactionError::FileExists(_))
        ));

        Ok(())
    }

    #[test]
    fn test_transaction_manager_thread_safety() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let manager = Arc::new(TransactionManager::create(&dir.path().join("test.xid"))?);
        let mut handles = vec![];

        for _ in 0..10 {
            let mgr = Arc::clone(&manager);
            let handle = thread::spawn(move || {
                let mut ids = vec![];
                for _ in 0..10 {
                    ids.push(mgr.begin().unwrap());
                }
                ids
            });
            handles.push(handle);
        }

        let mut all_ids = vec![];
        for handle in handles {
            all_ids.extend(handle.join().unwrap());
        }

        let mut unique_ids = all_ids.clone();
        unique_ids.sort();
        unique_ids.dedup();

        assert_eq!(all_ids.len(), 100);
        assert_eq!(unique_ids.len(), 100);
        assert_eq!(manager.transaction_count(), 100);
        assert_eq!(manager.active_transactions()?.len(), 100);

        Ok(())
    }
}
