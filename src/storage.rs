//! Storage layer implementation for vibecore.
//!
//! This module provides durable storage of fixed-size pages. Key components:
//!
//! - **PageManager**: Reads and writes 8KB pages of the `.db` file
//! - **PageCache**: Reference-counted in-memory cache of pages
//! - **Page layouts**: The reserved first page and append-only data pages
//! - **FreeSpaceIndex**: Bucketed hint of free space per page
//! - **WalManager**: Checksummed write-ahead log replayed by recovery

pub mod buffer;
pub mod disk;
pub mod error;
pub mod free_space;
pub mod page;
pub mod wal;

pub use buffer::{PageCache, PageHandle, MIN_CACHE_PAGES};
pub use disk::{PageManager, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use free_space::{FreeSpaceIndex, PageInfo};
pub use page::{Page, PageId};
pub use wal::{LogRecord, WalManager};
