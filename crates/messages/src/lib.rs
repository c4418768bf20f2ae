//! Messages exchanged between superior and subordinate coordinators.
//!
//! Encoding is left to the transport: every message derives `serde` traits
//! and is otherwise opaque to the engine. Orders and status reports are
//! addressed by the subordinate's branch xid; a retry request is addressed by
//! server id.

pub mod remote;

pub use remote::{
    DoneStatusReport, OrderToCommit, OrderToPrepare, OrderToRollback, ReadyStatusReport,
    RemoteMessage, RemoteMessageType, RetryRequest,
};
