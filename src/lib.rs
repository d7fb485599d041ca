pub mod cache;
pub mod database;
pub mod recovery;
pub mod storage;
pub mod transaction;
