//! Orders sent by a superior to a subordinate.
//!
//! Each order re-enters the subordinate's coordinator exactly like a local
//! commit or rollback request.

use super::RemoteMessageType;
use serde::{Deserialize, Serialize};
use xachain_types::Xid;

/// Start the prepare phase of the subordinate transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderToPrepare {
    pub xid: Xid,
}

impl OrderToPrepare {
    pub fn new(xid: Xid) -> Self {
        Self { xid }
    }
}

impl RemoteMessageType for OrderToPrepare {
    fn message_type_id() -> &'static str {
        "order.prepare"
    }
}

/// The superior decided to commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderToCommit {
    pub xid: Xid,
}

impl OrderToCommit {
    pub fn new(xid: Xid) -> Self {
        Self { xid }
    }
}

impl RemoteMessageType for OrderToCommit {
    fn message_type_id() -> &'static str {
        "order.commit"
    }
}

/// The superior decided to roll back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderToRollback {
    pub xid: Xid,
}

impl OrderToRollback {
    pub fn new(xid: Xid) -> Self {
        Self { xid }
    }
}

impl RemoteMessageType for OrderToRollback {
    fn message_type_id() -> &'static str {
        "order.rollback"
    }
}
