//! Remote protocol message types.

mod order;
mod retry;
mod status;

pub use order::{OrderToCommit, OrderToPrepare, OrderToRollback};
pub use retry::RetryRequest;
pub use status::{DoneStatusReport, ReadyStatusReport};

use serde::{Deserialize, Serialize};
use xachain_types::{Outcome, ServerId, Xid};

/// Static type tag for a remote message, for transports that route by type.
pub trait RemoteMessageType {
    fn message_type_id() -> &'static str;
}

/// Any message that crosses a remote link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteMessage {
    // ═══════════════════════════════════════════════════════════════════════
    // Subordinate → superior
    // ═══════════════════════════════════════════════════════════════════════
    /// All local branches are prepared.
    Ready(ReadyStatusReport),

    /// All local branches finished with the given outcome.
    Done(DoneStatusReport),

    // ═══════════════════════════════════════════════════════════════════════
    // Superior → subordinate
    // ═══════════════════════════════════════════════════════════════════════
    OrderToPrepare(OrderToPrepare),
    OrderToCommit(OrderToCommit),
    OrderToRollback(OrderToRollback),

    /// Re-send the status of every transaction whose superior is `server`.
    RetryRequest(RetryRequest),
}

impl RemoteMessage {
    pub fn ready(xid: Xid) -> Self {
        RemoteMessage::Ready(ReadyStatusReport::new(xid))
    }

    pub fn done(xid: Xid, outcome: Outcome) -> Self {
        RemoteMessage::Done(DoneStatusReport::new(xid, outcome))
    }

    pub fn order_to_prepare(xid: Xid) -> Self {
        RemoteMessage::OrderToPrepare(OrderToPrepare::new(xid))
    }

    pub fn order_to_commit(xid: Xid) -> Self {
        RemoteMessage::OrderToCommit(OrderToCommit::new(xid))
    }

    pub fn order_to_rollback(xid: Xid) -> Self {
        RemoteMessage::OrderToRollback(OrderToRollback::new(xid))
    }

    pub fn retry_request(server: ServerId) -> Self {
        RemoteMessage::RetryRequest(RetryRequest::new(server))
    }

    /// The transaction this message concerns, if it is addressed by xid.
    pub fn xid(&self) -> Option<&Xid> {
        match self {
            RemoteMessage::Ready(m) => Some(&m.xid),
            RemoteMessage::Done(m) => Some(&m.xid),
            RemoteMessage::OrderToPrepare(m) => Some(&m.xid),
            RemoteMessage::OrderToCommit(m) => Some(&m.xid),
            RemoteMessage::OrderToRollback(m) => Some(&m.xid),
            RemoteMessage::RetryRequest(_) => None,
        }
    }

    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            RemoteMessage::Ready(_) => ReadyStatusReport::message_type_id(),
            RemoteMessage::Done(_) => DoneStatusReport::message_type_id(),
            RemoteMessage::OrderToPrepare(_) => OrderToPrepare::message_type_id(),
            RemoteMessage::OrderToCommit(_) => OrderToCommit::message_type_id(),
            RemoteMessage::OrderToRollback(_) => OrderToRollback::message_type_id(),
            RemoteMessage::RetryRequest(_) => RetryRequest::message_type_id(),
        }
    }

    /// Status reports flow from a subordinate up to its superior.
    pub fn is_status_report(&self) -> bool {
        matches!(self, RemoteMessage::Ready(_) | RemoteMessage::Done(_))
    }

    /// Orders flow from a superior down to a subordinate.
    pub fn is_order(&self) -> bool {
        matches!(
            self,
            RemoteMessage::OrderToPrepare(_)
                | RemoteMessage::OrderToCommit(_)
                | RemoteMessage::OrderToRollback(_)
        )
    }
}
