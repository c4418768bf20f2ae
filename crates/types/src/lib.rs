//! Core types for xachain transaction coordination.
//!
//! Everything here is plain data: identifiers, protocol states and the
//! outcome vocabulary shared by the coordinator, the remote protocol handler
//! and the watchdog. No I/O and no synchronization lives in this crate.

mod identifiers;
mod state;
mod xid;

pub use identifiers::{ResourceId, ServerId};
pub use state::{BranchState, Decision, Outcome, TransactionRole, TransactionState, Vote};
pub use xid::{Xid, XidError, MAX_BQUAL_SIZE, MAX_GTRID_SIZE};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    //! Fixtures for building transaction identifiers in tests.

    use crate::Xid;

    /// Format id used by test fixtures.
    pub const TEST_FORMAT_ID: i32 = 0x5841;

    /// Global xid with a gtrid derived from `n`.
    pub fn test_xid(n: u64) -> Xid {
        Xid::global(TEST_FORMAT_ID, format!("gtrid-{n}").into_bytes())
            .expect("test gtrid within size limit")
    }

    /// Branch of `global` with a qualifier derived from `n`.
    pub fn test_branch(global: &Xid, n: u64) -> Xid {
        global
            .branch(format!("bqual-{n}").into_bytes())
            .expect("test bqual within size limit")
    }
}
