use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 8192;

/// Raw access to the page file. Page numbers start at 1; page `n` lives at
/// byte offset `(n - 1) * PAGE_SIZE`.
pub struct PageManager {
    file: File,
}

impl PageManager {
    /// Create a new page file. Fails if `path` already exists.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| map_open_error(e, path))?;

        Ok(Self { file })
    }

    /// Open an existing page file for reading and writing.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| map_open_error(e, path))?;

        Ok(Self { file })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        if page_id.0 == 0 {
            return Err(StorageError::PageNotFound(page_id));
        }

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset + PAGE_SIZE as u64 > file_size {
            return Err(StorageError::PageNotFound(page_id));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;

        Ok(())
    }

    /// Write one page and force it to stable storage. Writing past the end
    /// grows the file.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        if page_id.0 == 0 {
            return Err(StorageError::PageNotFound(page_id));
        }

        let offset = Self::page_offset(page_id);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.sync_data()?;

        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as u32)
    }

    /// Cut (or zero-extend) the file to exactly `pages` pages.
    pub fn truncate(&mut self, pages: u32) -> StorageResult<()> {
        self.file.set_len(pages as u64 * PAGE_SIZE as u64)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn page_offset(page_id: PageId) -> u64 {
        (page_id.0 as u64 - 1) * PAGE_SIZE as u64
    }
}

fn map_open_error(e: std::io::Error, path: &Path) -> StorageError {
    match e.kind() {
        ErrorKind::AlreadyExists => StorageError::FileExists(path.to_path_buf()),
        ErrorKind::NotFound => StorageError::FileNotFound(path.to_path_buf()),
        ErrorKind::PermissionDenied => StorageError::FileNotReadWrite(path.to_path_buf()),
        _ => StorageError::Io(e),
    }
}
