//! Free-space index used to place inserts.
//!
//! The page size is split into `INTERVALS` buckets of `BUCKET_WIDTH` bytes.
//! A page is filed under `free_space / BUCKET_WIDTH`. [`FreeSpaceIndex::select`]
//! removes the page it hands out, so a page is in the index only while no
//! writer holds it for insertion. The index is a hint rebuilt at startup and
//! never reads pages itself.

use parking_lot::Mutex;

use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;

pub const INTERVALS: usize = 40;
pub const BUCKET_WIDTH: usize = PAGE_SIZE / INTERVALS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_id: PageId,
    pub free_space: usize,
}

pub struct FreeSpaceIndex {
    // A completely empty page lands in bucket INTERVALS, hence the extra one.
    buckets: Mutex<Vec<Vec<PageInfo>>>,
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![Vec::new(); INTERVALS + 1]),
        }
    }

    pub fn add(&self, page_id: PageId, free_space: usize) {
        let bucket = (free_space / BUCKET_WIDTH).min(INTERVALS);
        self.buckets.lock()[bucket].push(PageInfo {
            page_id,
            free_space,
        });
    }

    /// Take a page with at least `required` bytes free, if one is indexed.
    pub fn select(&self, required: usize) -> Option<PageInfo> {
        let mut buckets = self.buckets.lock();

        let lowest = required / BUCKET_WIDTH;
        if lowest > INTERVALS {
            return None;
        }

        // Entries in the lowest bucket only qualify on their recorded size.
        if let Some(pos) = buckets[lowest]
            .iter()
            .position(|info| info.free_space >= required)
        {
            return Some(buckets[lowest].remove(pos));
        }

        (lowest + 1..=INTERVALS)
            .find(|&bucket| !buckets[bucket].is_empty())
            .map(|bucket| buckets[bucket].remove(0))
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_removes_page() {
        let index = FreeSpaceIndex::new();
        index.add(PageId(7), 500);

        let info = index.select(500).unwrap();
        assert_eq!(info.page_id, PageId(7));
        assert_eq!(info.free_space, 500);

        assert_eq!(index.select(500), None);
        assert!(index.is_empty());
    }

    #[test]
    fn test_lowest_bucket_entry_too_small() {
        let index = FreeSpaceIndex::new();
        // Same bucket as 500 but not enough room.
        index.add(PageId(3), 420);

        assert_eq!(index.select(500), None);
        assert_eq!(index.len(), 1);
        assert_eq!(index.select(400).map(|info| info.page_id), Some(PageId(3)));
    }

    #[test]
    fn test_select_scans_upward() {
        let index = FreeSpaceIndex::new();
        index.add(PageId(2), 100);
        index.add(PageId(4), 4000);
        index.add(PageId(5), 8000);

        assert_eq!(index.select(1000).map(|info| info.page_id), Some(PageId(4)));
        assert_eq!(index.select(1000).map(|info| info.page_id), Some(PageId(5)));
        assert_eq!(index.select(1000), None);
        assert_eq!(index.select(50).map(|info| info.page_id), Some(PageId(2)));
    }

    #[test]
    fn test_empty_page_and_oversized_request() {
        let index = FreeSpaceIndex::new();
        index.add(PageId(9), PAGE_SIZE - 2);
        index.add(PageId(10), PAGE_SIZE);

        assert_eq!(index.select(PAGE_SIZE + 1), None);
        assert_eq!(index.select(PAGE_SIZE).map(|info| info.page_id), Some(PageId(10)));
        assert_eq!(index.select(PAGE_SIZE - 2).map(|info| info.page_id), Some(PageId(9)));
    }

    #[test]
    fn test_readd_after_use() {
        let index = FreeSpaceIndex::new();
        index.add(PageId(2), 3000);

        let info = index.select(1000).unwrap();
        assert!(index.is_empty());

        index.add(info.page_id, info.free_space - 1000);
        assert_eq!(index.select(2000).map(|info| info.page_id), Some(PageId(2)));
    }
}
