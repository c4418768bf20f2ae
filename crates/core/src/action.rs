//! Side effects requested by state machines.

use crate::Event;
use std::fmt;
use std::time::Duration;
use xachain_messages::RemoteMessage;
use xachain_types::{Decision, ServerId, Xid};

/// What a failed operation was, so the retry can be re-driven.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RetryTarget {
    /// Commit of a local or remote branch.
    Commit(Xid),
    /// Rollback of a local or remote branch.
    Rollback(Xid),
    /// Delivery of an order to the remote subordinate behind a branch.
    Order(Xid),
    /// Delivery of the current status report to the superior.
    Report,
}

impl fmt::Display for RetryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryTarget::Commit(branch) => write!(f, "commit({branch})"),
            RetryTarget::Rollback(branch) => write!(f, "rollback({branch})"),
            RetryTarget::Order(branch) => write!(f, "order({branch})"),
            RetryTarget::Report => write!(f, "report"),
        }
    }
}

/// Timer identifiers.
///
/// Setting a timer that is already armed replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    /// Transaction deadline, re-armed on every expiry.
    Deadline(Xid),
    /// Next attempt of a failed operation.
    Retry(Xid, RetryTarget),
}

impl TimerId {
    /// The transaction the timer belongs to.
    pub fn xid(&self) -> &Xid {
        match self {
            TimerId::Deadline(xid) | TimerId::Retry(xid, _) => xid,
        }
    }
}

/// Actions returned by state machines for the runner to perform.
#[derive(Debug, Clone)]
pub enum Action {
    /// Put an event on the bus.
    Publish { event: Event },

    /// Deliver `Event::TimerFired { id }` after `duration`.
    SetTimer { id: TimerId, duration: Duration },

    /// Drop a pending timer; a no-op if it already fired.
    CancelTimer { id: TimerId },

    /// Send a message over the remote link.
    ///
    /// The runner answers with `RemoteDelivered` or `RemoteDeliveryFailed`.
    SendRemote { to: ServerId, message: RemoteMessage },

    /// Write the decision to the decision log.
    ///
    /// Always returned before the phase-two requests it covers, so a runner
    /// that executes actions in order records before it broadcasts.
    RecordDecision { xid: Xid, decision: Decision },
}

impl Action {
    /// Shorthand for [`Action::Publish`].
    pub fn publish(event: Event) -> Self {
        Action::Publish { event }
    }

    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Publish { .. } => "Publish",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::SendRemote { .. } => "SendRemote",
            Action::RecordDecision { .. } => "RecordDecision",
        }
    }
}
