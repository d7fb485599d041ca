use byteorder::{BigEndian, ByteOrder};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::data_item;
use crate::storage::PAGE_SIZE;

// Header: 2-byte big-endian free space offset, records appended after it.
const FSO_OFFSET: usize = 0;
const HEADER_SIZE: usize = 2;

/// Free space of an empty data page.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - HEADER_SIZE;

/// Initial content of a freshly allocated data page.
pub fn init_raw() -> Box<[u8; PAGE_SIZE]> {
    let mut raw = Box::new([0u8; PAGE_SIZE]);
    DataPage::new(&mut raw);
    raw
}

/// Current free space offset of a data page buffer.
pub fn free_space_offset(data: &[u8; PAGE_SIZE]) -> u16 {
    BigEndian::read_u16(&data[FSO_OFFSET..FSO_OFFSET + 2])
}

pub fn free_space(data: &[u8; PAGE_SIZE]) -> usize {
    PAGE_SIZE.saturating_sub(free_space_offset(data) as usize)
}

/// The item framed at `offset`, if its whole frame lies between the header
/// and the free space offset.
pub fn item_at(data: &[u8; PAGE_SIZE], offset: u16) -> Option<(bool, &[u8])> {
    let start = offset as usize;
    if start < HEADER_SIZE {
        return None;
    }
    let (valid, payload) = data_item::parse(data, offset)?;
    if start + data_item::raw_len(payload.len()) > free_space_offset(data) as usize {
        return None;
    }
    Some((valid, payload))
}

/// Append-only record area over a page buffer.
pub struct DataPage<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> DataPage<'a> {
    pub fn new(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        let mut page = Self { data };
        page.set_free_space_offset(HEADER_SIZE as u16);
        page
    }

    pub fn from_data(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn free_space_offset(&self) -> u16 {
        free_space_offset(self.data)
    }

    pub fn free_space(&self) -> usize {
        free_space(self.data)
    }

    /// Append `raw` at the free space offset and return the offset used.
    pub fn insert(&mut self, raw: &[u8]) -> StorageResult<u16> {
        let available = self.free_space();
        if raw.len() > available {
            return Err(StorageError::PageFull {
                required: raw.len(),
                available,
            });
        }

        let offset = self.free_space_offset();
        self.write_at(offset, raw)?;
        self.set_free_space_offset(offset + raw.len() as u16);

        Ok(offset)
    }

    /// Write `raw` at `offset`, moving the free space offset forward if the
    /// write ends past it. Never moves it backwards.
    pub fn recover_insert(&mut self, raw: &[u8], offset: u16) -> StorageResult<()> {
        self.write_at(offset, raw)?;

        let end = offset as usize + raw.len();
        if (self.free_space_offset() as usize) < end {
            self.set_free_space_offset(end as u16);
        }
        Ok(())
    }

    /// Overwrite in place; the free space offset is left alone.
    pub fn recover_update(&mut self, raw: &[u8], offset: u16) -> StorageResult<()> {
        self.write_at(offset, raw)
    }

    /// Same-length overwrite of an existing record.
    pub fn overwrite(&mut self, raw: &[u8], offset: u16) -> StorageResult<()> {
        self.write_at(offset, raw)
    }

    fn write_at(&mut self, offset: u16, raw: &[u8]) -> StorageResult<()> {
        let start = offset as usize;
        if start < HEADER_SIZE || start + raw.len() > PAGE_SIZE {
            return Err(StorageError::OffsetOutOfBounds {
                offset: start,
                len: raw.len(),
            });
        }
        self.data[start..start + raw.len()].copy_from_slice(raw);
        Ok(())
    }

    fn set_free_space_offset(&mut self, offset: u16) {
        BigEndian::write_u16(&mut self.data[FSO_OFFSET..FSO_OFFSET + 2], offset);
    }
}
