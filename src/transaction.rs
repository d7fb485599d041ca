//! Transaction management module.
//!
//! This module provides the transaction status store for vibecore:
//! - Transaction id assignment (begin)
//! - Terminal state transitions (commit, abort)
//! - Durable state lookup used by recovery

pub mod id;
pub mod manager;
pub mod state;

// Re-export commonly used types
pub use id::{TransactionId, SUPER_XID};
pub use manager::{TransactionError, TransactionManager};
pub use state::TransactionState;
