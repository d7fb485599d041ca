use crate::cache::{CacheSource, RefCountCache};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{Page, PageId};
use crate::storage::{PageManager, PAGE_SIZE};
use log::{debug, error};
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Smallest number of resident pages a page cache accepts.
pub const MIN_CACHE_PAGES: usize = 10;

/// Backing store of the page cache: the page file plus the allocation
/// counter for new page numbers.
struct PageStore {
    page_manager: Mutex<PageManager>,
    page_count: AtomicU32,
}

impl PageStore {
    fn flush(&self, page: &Page) -> StorageResult<()> {
        let data = page.data();
        self.page_manager.lock().write_page(page.page_id(), &data)?;
        page.set_dirty(false);
        Ok(())
    }
}

impl CacheSource for PageStore {
    type Value = Arc<Page>;

    fn load(&self, key: u64) -> StorageResult<Arc<Page>> {
        let page_id = PageId(key as u32);
        let mut data = Box::new([0u8; PAGE_SIZE]);
        self.page_manager.lock().read_page(page_id, &mut data)?;
        Ok(Arc::new(Page::new(page_id, data)))
    }

    fn write_back(&self, _key: u64, page: &Arc<Page>) -> StorageResult<()> {
        if page.is_dirty() {
            debug!("writing back dirty {}", page.page_id());
            self.flush(page)?;
        }
        Ok(())
    }
}

/// Reference-counted cache of the pages of one `.db` file.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<RefCountCache<PageStore>>,
}

impl PageCache {
    /// Create a new page file at `path`; fails if it already exists.
    pub fn create(path: &Path, max_pages: usize) -> StorageResult<Self> {
        let page_manager = PageManager::create(path)?;
        Self::new(page_manager, max_pages)
    }

    /// Open an existing page file at `path`.
    pub fn open(path: &Path, max_pages: usize) -> StorageResult<Self> {
        let page_manager = PageManager::open(path)?;
        Self::new(page_manager, max_pages)
    }

    fn new(page_manager: PageManager, max_pages: usize) -> StorageResult<Self> {
        if max_pages < MIN_CACHE_PAGES {
            return Err(StorageError::MemoryTooSmall {
                pages: max_pages,
                min_pages: MIN_CACHE_PAGES,
            });
        }

        let page_count = page_manager.num_pages()?;
        let store = PageStore {
            page_manager: Mutex::new(page_manager),
            page_count: AtomicU32::new(page_count),
        };

        Ok(Self {
            inner: Arc::new(RefCountCache::new(store, max_pages)),
        })
    }

    /// Allocate the next page number and write `init` to it immediately.
    /// The page is not loaded into the cache.
    pub fn new_page(&self, init: &[u8]) -> StorageResult<PageId> {
        if init.len() > PAGE_SIZE {
            return Err(StorageError::DataTooLarge {
                size: init.len(),
                max: PAGE_SIZE,
            });
        }

        let store = self.inner.source();
        let page_id = PageId(store.page_count.fetch_add(1, Ordering::SeqCst) + 1);

        let mut data = Box::new([0u8; PAGE_SIZE]);
        data[..init.len()].copy_from_slice(init);
        store.page_manager.lock().write_page(page_id, &data)?;

        Ok(page_id)
    }

    /// Fetch a page, reading it from disk if it is not resident.
    pub fn get_page(&self, page_id: PageId) -> StorageResult<PageHandle> {
        let page = self.inner.get(page_id.0 as u64)?;
        Ok(PageHandle {
            inner: Arc::clone(&self.inner),
            page: Some(page),
        })
    }

    /// Drop one reference to `page`, writing it back if it was the last.
    pub fn release(&self, page: PageHandle) -> StorageResult<()> {
        page.release()
    }

    /// Write the page to disk now, regardless of its reference count.
    pub fn flush_page(&self, page: &PageHandle) -> StorageResult<()> {
        self.inner.source().flush(page)
    }

    /// Cut the page file to exactly `max_page_id` pages.
    pub fn truncate_by_page_number(&self, max_page_id: u32) -> StorageResult<()> {
        let store = self.inner.source();
        store.page_manager.lock().truncate(max_page_id)?;
        store.page_count.store(max_page_id, Ordering::SeqCst);
        Ok(())
    }

    /// Number of pages in the file.
    pub fn page_number(&self) -> u32 {
        self.inner.source().page_count.load(Ordering::SeqCst)
    }

    /// Number of pages currently holding a cache slot.
    pub fn resident_pages(&self) -> usize {
        self.inner.len()
    }

    /// Write back every resident page. Handles still alive afterwards no
    /// longer hold a cache slot.
    pub fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }
}

/// A counted reference to a cached page.
///
/// Releasing the handle, explicitly or by dropping it, gives the reference
/// back to the cache it came from.
pub struct PageHandle {
    inner: Arc<RefCountCache<PageStore>>,
    page: Option<Arc<Page>>,
}

impl PageHandle {
    pub fn page_id(&self) -> PageId {
        self.page().page_id()
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.page().data()
    }

    /// Lock the buffer for writing; marks the page dirty.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.page().data_mut()
    }

    pub fn release(mut self) -> StorageResult<()> {
        match self.page.take() {
            Some(page) => self.inner.release(page.page_id().0 as u64),
            None => Ok(()),
        }
    }

    fn page(&self) -> &Page {
        // Only `release` and `drop` take the page, and both consume the handle.
        match &self.page {
            Some(page) => page,
            None => unreachable!("page handle used after release"),
        }
    }
}

impl Deref for PageHandle {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.page()
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = self.inner.release(page.page_id().0 as u64) {
                error!("failed to release {}: {}", page.page_id(), e);
            }
        }
    }
}
