//! WAL manager implementation.
//!
//! File layout: `[global checksum:4][record]*[bad tail?]`, each record being
//! `[size:4][checksum:4][data:size]`. The record checksum covers `data`; the
//! global checksum folds every complete record in file order and is rewritten
//! and forced after each append. On open, records are replayed until one
//! fails to verify. A fold that still disagrees with the header means the
//! log is corrupt inside; otherwise the unverified tail is cut off.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use log::{error, warn};
use parking_lot::Mutex;

use crate::storage::error::{StorageError, StorageResult};

const SEED: u32 = 13331;

const HEADER_SIZE: u64 = 4;
const SIZE_OFFSET: usize = 0;
const CHECKSUM_OFFSET: usize = SIZE_OFFSET + 4;
const DATA_OFFSET: usize = CHECKSUM_OFFSET + 4;

/// Fold `bytes` into `acc` as `acc * SEED + byte`, bytes taken as signed.
pub fn checksum(acc: u32, bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(acc, |acc, &b| acc.wrapping_mul(SEED).wrapping_add(b as i8 as u32))
}

struct WalFile {
    file: File,
    /// Length of the validated log, where the next record goes.
    size: u64,
    /// Read cursor for `next`.
    position: u64,
    /// Fold over every record in the file.
    checksum: u32,
}

impl WalFile {
    /// Read the complete record at the cursor, or `None` if it is truncated
    /// or fails its checksum.
    fn read_record(&mut self) -> StorageResult<Option<Vec<u8>>> {
        if self.position + DATA_OFFSET as u64 > self.size {
            return Ok(None);
        }

        self.file.seek(SeekFrom::Start(self.position))?;
        let size = self.file.read_u32::<BigEndian>()? as u64;
        if self.position + DATA_OFFSET as u64 + size > self.size {
            return Ok(None);
        }

        let mut record = vec![0u8; DATA_OFFSET + size as usize];
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.read_exact(&mut record)?;

        let stored = BigEndian::read_u32(&record[CHECKSUM_OFFSET..DATA_OFFSET]);
        if checksum(0, &record[DATA_OFFSET..]) != stored {
            return Ok(None);
        }

        self.position += record.len() as u64;
        Ok(Some(record))
    }

    fn write_checksum(&mut self) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_u32::<BigEndian>(self.checksum)?;
        self.file.sync_data()?;
        Ok(())
    }
}

pub struct WalManager {
    file: Mutex<WalFile>,
}

impl WalManager {
    /// Create a new, empty log at `path`. Fails if the file exists.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::FileExists(path.to_path_buf()),
                ErrorKind::PermissionDenied => StorageError::FileNotReadWrite(path.to_path_buf()),
                _ => StorageError::Io(e),
            })?;

        let mut wal = WalFile {
            file,
            size: HEADER_SIZE,
            position: HEADER_SIZE,
            checksum: 0,
        };
        wal.write_checksum()?;

        Ok(Self {
            file: Mutex::new(wal),
        })
    }

    /// Open an existing log, validating it and dropping any bad tail.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::FileNotFound(path.to_path_buf()),
                ErrorKind::PermissionDenied => StorageError::FileNotReadWrite(path.to_path_buf()),
                _ => StorageError::Io(e),
            })?;

        let size = file.metadata()?.len();
        if size < HEADER_SIZE {
            error!("log file {:?} is shorter than its header", path);
            return Err(StorageError::BadLogFile(format!(
                "file is {} bytes, shorter than the header",
                size
            )));
        }

        file.seek(SeekFrom::Start(0))?;
        let stored = file.read_u32::<BigEndian>()?;

        let mut wal = WalFile {
            file,
            size,
            position: HEADER_SIZE,
            checksum: 0,
        };

        let mut derived = 0;
        while let Some(record) = wal.read_record()? {
            derived = checksum(derived, &record);
        }
        if derived != stored {
            error!(
                "log file {:?} checksum mismatch: header {:#010x}, records {:#010x}",
                path, stored, derived
            );
            return Err(StorageError::BadLogFile(format!(
                "checksum mismatch: header {:#010x}, records {:#010x}",
                stored, derived
            )));
        }

        let valid_end = wal.position;
        if valid_end < size {
            warn!(
                "dropping {} bytes of incomplete log tail from {:?}",
                size - valid_end,
                path
            );
            wal.file.set_len(valid_end)?;
            wal.file.sync_all()?;
        }
        wal.size = valid_end;
        wal.position = HEADER_SIZE;
        wal.checksum = stored;

        Ok(Self {
            file: Mutex::new(wal),
        })
    }

    /// Append one record and make it durable.
    pub fn log(&self, data: &[u8]) -> StorageResult<()> {
        let mut record = vec![0u8; DATA_OFFSET + data.len()];
        BigEndian::write_u32(&mut record[SIZE_OFFSET..CHECKSUM_OFFSET], data.len() as u32);
        BigEndian::write_u32(&mut record[CHECKSUM_OFFSET..DATA_OFFSET], checksum(0, data));
        record[DATA_OFFSET..].copy_from_slice(data);

        let mut wal = self.file.lock();
        let end = wal.size;
        wal.file.seek(SeekFrom::Start(end))?;
        wal.file.write_all(&record)?;
        wal.size += record.len() as u64;

        // The header is rewritten last: a crash before this leaves a bad tail.
        wal.checksum = checksum(wal.checksum, &record);
        wal.write_checksum()
    }

    /// Data of the record at the read cursor, advancing past it.
    pub fn next(&self) -> StorageResult<Option<Vec<u8>>> {
        let mut wal = self.file.lock();
        Ok(wal
            .read_record()?
            .map(|record| record[DATA_OFFSET..].to_vec()))
    }

    /// Move the read cursor back to the first record.
    pub fn rewind(&self) {
        self.file.lock().position = HEADER_SIZE;
    }

    /// Length of the log file in bytes.
    pub fn len(&self) -> u64 {
        self.file.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    fn read_all(wal: &WalManager) -> Result<Vec<Vec<u8>>> {
        wal.rewind();
        let mut records = Vec::new();
        while let Some(record) = wal.next()? {
            records.push(record);
        }
        Ok(records)
    }

    #[test]
    fn test_checksum_fold() {
        assert_eq!(checksum(0, &[]), 0);
        assert_eq!(checksum(0, &[1]), 1);
        assert_eq!(checksum(0, &[1, 2]), SEED + 2);
        // Bytes above 0x7f count as negative.
        assert_eq!(checksum(0, &[0xFF]), u32::MAX);
        assert_eq!(checksum(5, &[0, 0]), 5u32.wrapping_mul(SEED).wrapping_mul(SEED));
    }

    #[test]
    fn test_create_writes_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");
        let wal = WalManager::create(&path)?;

        assert!(wal.is_empty());
        assert_eq!(fs::read(&path)?, vec![0, 0, 0, 0]);
        assert!(WalManager::create(&path).is_err());

        Ok(())
    }

    #[test]
    fn test_write_and_read_records() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");

        {
            let wal = WalManager::create(&path)?;
            wal.log(b"first")?;
            wal.log(b"second")?;
            wal.log(b"third")?;
            assert_eq!(wal.len(), 4 + 3 * 8 + 5 + 6 + 5);
        }

        let wal = WalManager::open(&path)?;
        let expected: Vec<Vec<u8>> = vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()];
        assert_eq!(read_all(&wal)?, expected);
        assert_eq!(wal.next()?, None);

        // Rewinding allows another full pass.
        assert_eq!(read_all(&wal)?, expected);

        Ok(())
    }

    #[test]
    fn test_header_matches_record_fold() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");
        let wal = WalManager::create(&path)?;
        wal.log(&[1, 2, 3])?;
        wal.log(&[0x80])?;

        let bytes = fs::read(&path)?;
        let fold = checksum(checksum(0, &bytes[4..15]), &bytes[15..]);
        assert_eq!(BigEndian::read_u32(&bytes[..4]), fold);

        Ok(())
    }

    #[test]
    fn test_bad_tail_is_truncated() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");

        {
            let wal = WalManager::create(&path)?;
            wal.log(b"r1")?;
            wal.log(b"r2")?;
        }
        let valid_len = fs::metadata(&path)?.len();

        // Half-written record: claims 100 bytes, has 5.
        {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_u32::<BigEndian>(100)?;
            file.write_u32::<BigEndian>(0xDEADBEEF)?;
            file.write_all(b"trunc")?;
        }
        assert!(fs::metadata(&path)?.len() > valid_len);

        let wal = WalManager::open(&path)?;
        assert_eq!(fs::metadata(&path)?.len(), valid_len);
        assert_eq!(read_all(&wal)?, vec![b"r1".to_vec(), b"r2".to_vec()]);

        // Appends continue from the cut.
        wal.log(b"r3")?;
        drop(wal);
        let wal = WalManager::open(&path)?;
        assert_eq!(
            read_all(&wal)?,
            vec![b"r1".to_vec(), b"r2".to_vec(), b"r3".to_vec()]
        );

        Ok(())
    }

    #[test]
    fn test_garbled_tail_checksum_is_truncated() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");

        {
            let wal = WalManager::create(&path)?;
            wal.log(b"r1")?;
        }
        let valid_len = fs::metadata(&path)?.len();

        // Complete length but wrong checksum.
        {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_u32::<BigEndian>(3)?;
            file.write_u32::<BigEndian>(1)?;
            file.write_all(b"abc")?;
        }

        let wal = WalManager::open(&path)?;
        assert_eq!(wal.len(), valid_len);
        assert_eq!(read_all(&wal)?, vec![b"r1".to_vec()]);

        Ok(())
    }

    #[test]
    fn test_interior_corruption_is_fatal() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");

        {
            let wal = WalManager::create(&path)?;
            wal.log(b"r1")?;
            wal.log(b"r2")?;
        }

        let mut bytes = fs::read(&path)?;
        bytes[4 + 8] ^= 0xFF;
        fs::write(&path, &bytes)?;

        assert!(matches!(
            WalManager::open(&path),
            Err(StorageError::BadLogFile(_))
        ));

        Ok(())
    }

    #[test]
    fn test_short_file_is_fatal() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.log");
        fs::write(&path, [0u8, 0])?;

        assert!(matches!(
            WalManager::open(&path),
            Err(StorageError::BadLogFile(_))
        ));
        assert!(matches!(
            WalManager::open(&dir.path().join("missing.log")),
            Err(StorageError::FileNotFound(_))
        ));

        Ok(())
    }

    #[test]
    fn test_records_visible_to_reader_after_append() -> Result<()> {
        let dir = tempdir()?;
        let wal = WalManager::create(&dir.path().join("test.log"))?;

        wal.log(b"a")?;
        assert_eq!(wal.next()?, Some(b"a".to_vec()));
        assert_eq!(wal.next()?, None);

        wal.log(b"b")?;
        assert_eq!(wal.next()?, Some(b"b".to_vec()));

        Ok(())
    }
}
