//! Log record encoding.
//!
//! Two record shapes, both big-endian:
//! - insert: `[0][xid:8][pgno:4][offset:2][raw]`
//! - update: `[1][xid:8][uid:8][old_raw][new_raw]`, old and new of equal length

use bytes::{Buf, BufMut};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{address_to_uid, uid_to_address, PageId};
use crate::transaction::TransactionId;

const LOG_TYPE_INSERT: u8 = 0;
const LOG_TYPE_UPDATE: u8 = 1;

const INSERT_HEADER_SIZE: usize = 1 + 8 + 4 + 2;
const UPDATE_HEADER_SIZE: usize = 1 + 8 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRecord {
    pub xid: TransactionId,
    pub page_id: PageId,
    pub offset: u16,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    pub xid: TransactionId,
    pub page_id: PageId,
    pub offset: u16,
    pub old_raw: Vec<u8>,
    pub new_raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Insert(InsertRecord),
    Update(UpdateRecord),
}

impl LogRecord {
    pub fn insert(xid: TransactionId, page_id: PageId, offset: u16, raw: Vec<u8>) -> Self {
        LogRecord::Insert(InsertRecord {
            xid,
            page_id,
            offset,
            raw,
        })
    }

    pub fn update(xid: TransactionId, uid: u64, old_raw: Vec<u8>, new_raw: Vec<u8>) -> Self {
        let (page_id, offset) = uid_to_address(uid);
        LogRecord::Update(UpdateRecord {
            xid,
            page_id,
            offset,
            old_raw,
            new_raw,
        })
    }

    pub fn xid(&self) -> TransactionId {
        match self {
            LogRecord::Insert(record) => record.xid,
            LogRecord::Update(record) => record.xid,
        }
    }

    pub fn page_id(&self) -> PageId {
        match self {
            LogRecord::Insert(record) => record.page_id,
            LogRecord::Update(record) => record.page_id,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            LogRecord::Insert(record) => {
                let mut buf = Vec::with_capacity(INSERT_HEADER_SIZE + record.raw.len());
                buf.put_u8(LOG_TYPE_INSERT);
                buf.put_u64(record.xid.value());
                buf.put_u32(record.page_id.0);
                buf.put_u16(record.offset);
                buf.put_slice(&record.raw);
                buf
            }
            LogRecord::Update(record) => {
                let mut buf = Vec::with_capacity(
                    UPDATE_HEADER_SIZE + record.old_raw.len() + record.new_raw.len(),
                );
                buf.put_u8(LOG_TYPE_UPDATE);
                buf.put_u64(record.xid.value());
                buf.put_u64(address_to_uid(record.page_id, record.offset));
                buf.put_slice(&record.old_raw);
                buf.put_slice(&record.new_raw);
                buf
            }
        }
    }

    pub fn decode(mut data: &[u8]) -> StorageResult<Self> {
        if data.is_empty() {
            return Err(StorageError::InvalidLogRecord("empty record".to_string()));
        }

        match data.get_u8() {
            LOG_TYPE_INSERT => {
                if data.remaining() < INSERT_HEADER_SIZE - 1 {
                    return Err(StorageError::InvalidLogRecord(format!(
                        "insert record too short: {} bytes",
                        data.remaining() + 1
                    )));
                }
                let xid = TransactionId::new(data.get_u64());
                let page_id = PageId(data.get_u32());
                let offset = data.get_u16();
                Ok(LogRecord::insert(xid, page_id, offset, data.to_vec()))
            }
            LOG_TYPE_UPDATE => {
                if data.remaining() < UPDATE_HEADER_SIZE - 1 {
                    return Err(StorageError::InvalidLogRecord(format!(
                        "update record too short: {} bytes",
                        data.remaining() + 1
                    )));
                }
                let xid = TransactionId::new(data.get_u64());
                let uid = data.get_u64();
                if data.remaining() % 2 != 0 {
                    return Err(StorageError::InvalidLogRecord(format!(
                        "update images of uneven total length {}",
                        data.remaining()
                    )));
                }
                let (old_raw, new_raw) = data.split_at(data.remaining() / 2);
                Ok(LogRecord::update(xid, uid, old_raw.to_vec(), new_raw.to_vec()))
            }
            other => Err(StorageError::InvalidLogRecord(format!(
                "unknown record type {}",
                other
            ))),
        }
    }
}
