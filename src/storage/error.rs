//! Storage layer error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::page::PageId;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache is full: {max_resources} resources already resident")]
    CacheFull { max_resources: usize },

    #[error("Key {0} is not resident in the cache")]
    NotCached(u64),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("File already exists: {0:?}")]
    FileExists(PathBuf),

    #[error("File does not exist: {0:?}")]
    FileNotFound(PathBuf),

    #[error("File is not readable and writable: {0:?}")]
    FileNotReadWrite(PathBuf),

    #[error("Bad log file: {0}")]
    BadLogFile(String),

    #[error("Cache memory too small: {pages} pages (min: {min_pages})")]
    MemoryTooSmall { pages: usize, min_pages: usize },

    #[error("Data too large: {size} bytes (max: {max})")]
    DataTooLarge { size: usize, max: usize },

    #[error("Database is busy: no page with {required} bytes of free space")]
    DatabaseBusy { required: usize },

    #[error("Invalid log record: {0}")]
    InvalidLogRecord(String),

    #[error("Page is full: requires {required} bytes but only {available} available")]
    PageFull { required: usize, available: usize },

    #[error("Write of {len} bytes at offset {offset} exceeds the page")]
    OffsetOutOfBounds { offset: usize, len: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the caller can retry after freeing resources.
    ///
    /// Everything else means the on-disk state or the environment is broken.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::CacheFull { .. } | StorageError::DatabaseBusy { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
