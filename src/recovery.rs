//! Recovery and crash resilience module.
//!
//! This module restores a consistent page file after an unclean shutdown:
//! - Truncation of pages allocated but never logged
//! - Redo of operations from finished transactions
//! - Undo of operations from transactions that never finished

pub mod replay;

// Re-export commonly used types
pub use replay::{recover, RecoveryError, RecoveryResult, RecoveryStats};
