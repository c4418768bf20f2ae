//! Status reports sent by a subordinate to its superior.

use super::RemoteMessageType;
use serde::{Deserialize, Serialize};
use xachain_types::{Outcome, Xid};

/// Every local branch of the subordinate transaction is prepared.
///
/// The subordinate holds its prepared state until an order arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyStatusReport {
    /// Branch xid under which the superior knows this subordinate.
    pub xid: Xid,
}

impl ReadyStatusReport {
    pub fn new(xid: Xid) -> Self {
        Self { xid }
    }
}

impl RemoteMessageType for ReadyStatusReport {
    fn message_type_id() -> &'static str {
        "status.ready"
    }
}

/// Every local branch of the subordinate transaction finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneStatusReport {
    pub xid: Xid,
    /// Outcome the local branches reached.
    pub outcome: Outcome,
}

impl DoneStatusReport {
    pub fn new(xid: Xid, outcome: Outcome) -> Self {
        Self { xid, outcome }
    }
}

impl RemoteMessageType for DoneStatusReport {
    fn message_type_id() -> &'static str {
        "status.done"
    }
}
