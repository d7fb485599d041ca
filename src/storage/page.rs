pub mod data_item;
pub mod data_page;
pub mod page_one;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::PAGE_SIZE;

/// 1-based page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page{}", self.0)
    }
}

/// Pack a page number and in-page offset into a data item uid.
pub fn address_to_uid(page_id: PageId, offset: u16) -> u64 {
    ((page_id.0 as u64) << 32) | offset as u64
}

pub fn uid_to_address(uid: u64) -> (PageId, u16) {
    let offset = (uid & 0xFFFF) as u16;
    let pgno = (uid >> 32) as u32;
    (PageId(pgno), offset)
}

/// In-memory copy of one page.
///
/// The buffer lock orders mutations within the page; taking it for writing
/// marks the page dirty. The dirty flag is cleared only when the page is
/// flushed.
pub struct Page {
    page_id: PageId,
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    dirty: AtomicBool,
}

impl Page {
    pub fn new(page_id: PageId, data: Box<[u8; PAGE_SIZE]>) -> Self {
        Self {
            page_id,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        let guard = self.data.write();
        self.dirty.store(true, Ordering::SeqCst);
        guard
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::SeqCst);
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_uid_round_trip() {
        let uid = address_to_uid(PageId(5), 0x1234);
        assert_eq!(uid, (5u64 << 32) | 0x1234);
        assert_eq!(uid_to_address(uid), (PageId(5), 0x1234));
    }

    #[test]
    fn test_uid_ignores_bits_between_offset_and_pgno() {
        let uid = (9u64 << 32) | 0x00AB_0010;
        assert_eq!(uid_to_address(uid), (PageId(9), 0x0010));
    }

    #[test]
    fn test_write_access_marks_dirty() {
        let page = Page::new(PageId(2), Box::new([0u8; PAGE_SIZE]));
        assert!(!page.is_dirty());

        assert_eq!(page.data()[0], 0);
        assert!(!page.is_dirty());

        page.data_mut()[0] = 7;
        assert!(page.is_dirty());
        assert_eq!(page.data()[0], 7);

        page.set_dirty(false);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_writer_waiting_on_flush_stays_dirty() {
        let page = Arc::new(Page::new(PageId(2), Box::new([0u8; PAGE_SIZE])));

        // A flush holds the read guard while it writes the page out.
        let flushing = page.data();

        let writer = {
            let page = Arc::clone(&page);
            thread::spawn(move || page.data_mut()[0] = 1)
        };
        thread::sleep(Duration::from_millis(50));

        // The flush finishes and clears the flag before the writer gets in.
        page.set_dirty(false);
        drop(flushing);
        writer.join().unwrap();

        assert!(page.is_dirty());
        assert_eq!(page.data()[0], 1);
    }
}
