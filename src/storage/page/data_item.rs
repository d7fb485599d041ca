//! Framing of records stored in data pages: `[valid:1][size:2][data]`.
//!
//! A valid byte of 0 marks a live item, 1 a logically deleted one.

use byteorder::{BigEndian, ByteOrder};

use crate::storage::PAGE_SIZE;

const VALID_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 1;
const DATA_OFFSET: usize = 3;

const VALID: u8 = 0;
const INVALID: u8 = 1;

/// Size of the frame around `data_len` bytes of payload.
pub fn raw_len(data_len: usize) -> usize {
    DATA_OFFSET + data_len
}

pub fn wrap_raw(data: &[u8]) -> Vec<u8> {
    let mut raw = vec![0u8; raw_len(data.len())];
    raw[VALID_OFFSET] = VALID;
    BigEndian::write_u16(&mut raw[SIZE_OFFSET..DATA_OFFSET], data.len() as u16);
    raw[DATA_OFFSET..].copy_from_slice(data);
    raw
}

pub fn set_raw_invalid(raw: &mut [u8]) {
    if let Some(valid) = raw.get_mut(VALID_OFFSET) {
        *valid = INVALID;
    }
}

/// Read the frame starting at `offset`. Returns `None` if it does not fit in
/// the page.
pub fn parse(page: &[u8; PAGE_SIZE], offset: u16) -> Option<(bool, &[u8])> {
    let start = offset as usize;
    if start + DATA_OFFSET > PAGE_SIZE {
        return None;
    }
    let size = BigEndian::read_u16(&page[start + SIZE_OFFSET..start + DATA_OFFSET]) as usize;
    let end = start + DATA_OFFSET + size;
    if end > PAGE_SIZE {
        return None;
    }
    Some((page[start + VALID_OFFSET] == VALID, &page[start + DATA_OFFSET..end]))
}
