//! Layout of the reserved first page.
//!
//! Bytes 100..108 receive a random marker every time the database opens and
//! are copied to 108..116 on a clean close. If the two fields differ on the
//! next open, the previous session crashed and recovery has to run.

use rand::RngCore;

use crate::storage::PAGE_SIZE;

const VC_OFFSET: usize = 100;
const VC_LEN: usize = 8;

/// Initial content of page 1, with a fresh open marker.
pub fn init_raw() -> Box<[u8; PAGE_SIZE]> {
    let mut raw = Box::new([0u8; PAGE_SIZE]);
    set_vc_open(&mut raw);
    raw
}

pub fn set_vc_open(data: &mut [u8; PAGE_SIZE]) {
    rand::thread_rng().fill_bytes(&mut data[VC_OFFSET..VC_OFFSET + VC_LEN]);
}

pub fn set_vc_close(data: &mut [u8; PAGE_SIZE]) {
    data.copy_within(VC_OFFSET..VC_OFFSET + VC_LEN, VC_OFFSET + VC_LEN);
}

/// True if the last session closed cleanly.
pub fn check_vc(data: &[u8; PAGE_SIZE]) -> bool {
    data[VC_OFFSET..VC_OFFSET + VC_LEN] == data[VC_OFFSET + VC_LEN..VC_OFFSET + 2 * VC_LEN]
}
