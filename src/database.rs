use crate::recovery::{self, RecoveryError, RecoveryStats};
use crate::storage::buffer::{PageCache, PageHandle, MIN_CACHE_PAGES};
use crate::storage::error::StorageError;
use crate::storage::free_space::FreeSpaceIndex;
use crate::storage::page::data_page::{self, DataPage, MAX_FREE_SPACE};
use crate::storage::page::{address_to_uid, data_item, page_one, uid_to_address, PageId};
use crate::storage::wal::{LogRecord, WalManager};
use crate::storage::PAGE_SIZE;
use crate::transaction::{TransactionError, TransactionId, TransactionManager};
use log::{debug, info, warn};
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

/// Free-space lookups attempted by one insert before giving up.
const INSERT_ATTEMPTS: usize = 5;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("No live item at uid {0:#x}")]
    ItemNotFound(u64),

    #[error("Update must keep the item size: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Base path; the `.xid`, `.log` and `.db` files are named after it.
    pub path: PathBuf,
    /// Memory given to the page cache, in bytes.
    pub cache_memory: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("vibecore"),
            cache_memory: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DatabaseConfig {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_memory(mut self, cache_memory: u64) -> Self {
        self.cache_memory = cache_memory;
        self
    }

    /// Number of pages the cache may hold.
    pub fn cache_pages(&self) -> usize {
        (self.cache_memory / PAGE_SIZE as u64) as usize
    }

    pub fn xid_path(&self) -> PathBuf {
        self.file_with_suffix(".xid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.file_with_suffix(".log")
    }

    pub fn db_path(&self) -> PathBuf {
        self.file_with_suffix(".db")
    }

    fn file_with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    fn check_cache_size(&self) -> DatabaseResult<usize> {
        let pages = self.cache_pages();
        if pages < MIN_CACHE_PAGES {
            return Err(StorageError::MemoryTooSmall {
                pages,
                min_pages: MIN_CACHE_PAGES,
            }
            .into());
        }
        Ok(pages)
    }
}

/// Storage core over the transaction status file, the log and the page file.
///
/// Page 1 stays referenced for the whole session. Call [`Database::close`]
/// for a clean shutdown; simply dropping the value leaves the crash marker
/// set and the next [`Database::open`] runs recovery.
pub struct Database {
    tm: TransactionManager,
    wal: WalManager,
    pc: PageCache,
    free_space: FreeSpaceIndex,
    page_one: PageHandle,
    recovery_stats: Option<RecoveryStats>,
}

impl Database {
    /// Create a new database; fails if any of its files already exists.
    pub fn create(config: &DatabaseConfig) -> DatabaseResult<Self> {
        let cache_pages = config.check_cache_size()?;

        let tm = TransactionManager::create(&config.xid_path())?;
        let wal = WalManager::create(&config.log_path())?;
        let pc = PageCache::create(&config.db_path(), cache_pages)?;

        let page_id = pc.new_page(&page_one::init_raw()[..])?;
        let page_one = pc.get_page(page_id)?;
        pc.flush_page(&page_one)?;

        info!("Created database at {}", config.path.display());
        Ok(Self {
            tm,
            wal,
            pc,
            free_space: FreeSpaceIndex::new(),
            page_one,
            recovery_stats: None,
        })
    }

    /// Open an existing database, recovering it if the last session crashed.
    pub fn open(config: &DatabaseConfig) -> DatabaseResult<Self> {
        let cache_pages = config.check_cache_size()?;

        let tm = TransactionManager::open(&config.xid_path())?;
        let wal = WalManager::open(&config.log_path())?;
        let pc = PageCache::open(&config.db_path(), cache_pages)?;

        let page_one = pc.get_page(PageId(1))?;
        let clean = page_one::check_vc(&page_one.data());
        let recovery_stats = if clean {
            None
        } else {
            warn!("Database was not closed cleanly, recovering");
            Some(recovery::recover(&tm, &wal, &pc)?)
        };

        let free_space = FreeSpaceIndex::new();
        fill_free_space_index(&pc, &free_space)?;

        page_one::set_vc_open(&mut page_one.data_mut());
        pc.flush_page(&page_one)?;

        info!(
            "Opened database at {} ({} pages)",
            config.path.display(),
            pc.page_number()
        );
        Ok(Self {
            tm,
            wal,
            pc,
            free_space,
            page_one,
            recovery_stats,
        })
    }

    /// Whether the last [`Database::open`] ran recovery.
    pub fn recovered(&self) -> bool {
        self.recovery_stats.is_some()
    }

    pub fn recovery_stats(&self) -> Option<&RecoveryStats> {
        self.recovery_stats.as_ref()
    }

    /// Number of pages in the page file, page 1 included.
    pub fn page_number(&self) -> u32 {
        self.pc.page_number()
    }

    pub fn transaction_count(&self) -> u64 {
        self.tm.transaction_count()
    }

    pub fn begin(&self) -> DatabaseResult<TransactionId> {
        Ok(self.tm.begin()?)
    }

    pub fn commit(&self, xid: TransactionId) -> DatabaseResult<()> {
        Ok(self.tm.commit(xid)?)
    }

    pub fn abort(&self, xid: TransactionId) -> DatabaseResult<()> {
        Ok(self.tm.abort(xid)?)
    }

    pub fn is_active(&self, xid: TransactionId) -> DatabaseResult<bool> {
        Ok(self.tm.is_active(xid)?)
    }

    pub fn is_committed(&self, xid: TransactionId) -> DatabaseResult<bool> {
        Ok(self.tm.is_committed(xid)?)
    }

    pub fn is_aborted(&self, xid: TransactionId) -> DatabaseResult<bool> {
        Ok(self.tm.is_aborted(xid)?)
    }

    /// Store `data` on behalf of `xid` and return its uid.
    pub fn insert(&self, xid: TransactionId, data: &[u8]) -> DatabaseResult<u64> {
        let raw_len = data_item::raw_len(data.len());
        if raw_len > MAX_FREE_SPACE {
            return Err(StorageError::DataTooLarge {
                size: raw_len,
                max: MAX_FREE_SPACE,
            }
            .into());
        }
        let raw = data_item::wrap_raw(data);

        let mut selected = None;
        for _ in 0..INSERT_ATTEMPTS {
            if let Some(info) = self.free_space.select(raw.len()) {
                selected = Some(info);
                break;
            }
            let page_id = self.pc.new_page(&data_page::init_raw()[..])?;
            debug!("allocated data {}", page_id);
            self.free_space.add(page_id, MAX_FREE_SPACE);
        }
        let info = selected.ok_or(StorageError::DatabaseBusy {
            required: raw.len(),
        })?;

        let page = match self.pc.get_page(info.page_id) {
            Ok(page) => page,
            Err(e) => {
                self.free_space.add(info.page_id, info.free_space);
                return Err(e.into());
            }
        };

        let result = self.append_logged(&page, xid, &raw);
        let free_space = data_page::free_space(&page.data());
        let released = page.release();
        self.free_space.add(info.page_id, free_space);

        let offset = result?;
        released?;
        Ok(address_to_uid(info.page_id, offset))
    }

    fn append_logged(&self, page: &PageHandle, xid: TransactionId, raw: &[u8]) -> DatabaseResult<u16> {
        let mut data = page.data_mut();
        let mut data_page = DataPage::from_data(&mut data);

        let available = data_page.free_space();
        if raw.len() > available {
            return Err(StorageError::PageFull {
                required: raw.len(),
                available,
            }
            .into());
        }

        let offset = data_page.free_space_offset();
        let record = LogRecord::insert(xid, page.page_id(), offset, raw.to_vec());
        self.wal.log(&record.encode())?;

        Ok(data_page.insert(raw)?)
    }

    /// Payload stored at `uid`, or `None` if it was deleted.
    pub fn read(&self, uid: u64) -> DatabaseResult<Option<Vec<u8>>> {
        let (page_id, offset) = uid_to_address(uid);
        let page = self.pc.get_page(page_id)?;
        let item = data_page::item_at(&page.data(), offset).map(|(valid, data)| (valid, data.to_vec()));
        page.release()?;

        match item {
            Some((true, data)) => Ok(Some(data)),
            Some((false, _)) => Ok(None),
            None => Err(DatabaseError::ItemNotFound(uid)),
        }
    }

    /// Replace the payload at `uid` with `data` of the same length.
    pub fn update(&self, xid: TransactionId, uid: u64, data: &[u8]) -> DatabaseResult<()> {
        self.modify_logged(xid, uid, |old_raw| {
            let new_raw = data_item::wrap_raw(data);
            if new_raw.len() != old_raw.len() {
                return Err(DatabaseError::SizeMismatch {
                    expected: old_raw.len() - data_item::raw_len(0),
                    actual: data.len(),
                });
            }
            Ok(new_raw)
        })
    }

    /// Logically delete the item at `uid`.
    pub fn delete(&self, xid: TransactionId, uid: u64) -> DatabaseResult<()> {
        self.modify_logged(xid, uid, |old_raw| {
            let mut new_raw = old_raw.to_vec();
            data_item::set_raw_invalid(&mut new_raw);
            Ok(new_raw)
        })
    }

    // Log old and new frame, then overwrite, all under the page write lock.
    fn modify_logged<F>(&self, xid: TransactionId, uid: u64, build: F) -> DatabaseResult<()>
    where
        F: FnOnce(&[u8]) -> DatabaseResult<Vec<u8>>,
    {
        let (page_id, offset) = uid_to_address(uid);
        let page = self.pc.get_page(page_id)?;
        {
            let mut data = page.data_mut();
            let old_raw = match data_page::item_at(&data, offset) {
                Some((true, payload)) => {
                    let start = offset as usize;
                    data[start..start + data_item::raw_len(payload.len())].to_vec()
                }
                _ => return Err(DatabaseError::ItemNotFound(uid)),
            };
            let new_raw = build(&old_raw)?;

            self.wal
                .log(&LogRecord::update(xid, uid, old_raw, new_raw.clone()).encode())?;
            DataPage::from_data(&mut data).overwrite(&new_raw, offset)?;
        }
        page.release()?;
        Ok(())
    }

    /// Shut down cleanly: mark page 1 closed and write back every page.
    pub fn close(self) -> DatabaseResult<()> {
        let Database { pc, page_one, .. } = self;

        page_one::set_vc_close(&mut page_one.data_mut());
        page_one.release()?;
        pc.close()?;

        info!("Database closed");
        Ok(())
    }
}

fn fill_free_space_index(pc: &PageCache, free_space: &FreeSpaceIndex) -> DatabaseResult<()> {
    for pgno in 2..=pc.page_number() {
        let page = pc.get_page(PageId(pgno))?;
        let space = data_page::free_space(&page.data());
        page.release()?;
        free_space.add(PageId(pgno), space);
    }
    debug!("indexed {} data pages", free_space.len());
    Ok(())
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("page_number", &self.pc.page_number())
            .field("transactions", &self.tm.transaction_count())
            .field("recovered", &self.recovered())
            .finish()
    }
}
