//! Events: the only unit of communication between components.

use crate::{Anomaly, Participant, ProtocolViolation, RetryTarget, RollbackReason, TimerId};
use std::time::Duration;
use xachain_messages::RemoteMessage;
use xachain_types::{Outcome, ServerId, Vote, Xid};

/// Every message that travels on the bus.
///
/// Events are immutable once constructed. Subscribers register interest by
/// [`EventKind`], the payload-free tag of each variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Client requests
    // ═══════════════════════════════════════════════════════════════════════
    /// Start a transaction. `superior` makes it a subordinate of a remote
    /// coordinator; `timeout` overrides the configured deadline.
    BeginTransaction {
        xid: Xid,
        superior: Option<ServerId>,
        timeout: Option<Duration>,
    },

    /// Enlist a branch.
    RegisterBranch {
        xid: Xid,
        branch: Xid,
        participant: Participant,
    },

    SubmitCommit {
        xid: Xid,
    },

    SubmitRollback {
        xid: Xid,
    },

    /// Operator asks to re-drive a stuck transaction.
    OperatorRetry {
        xid: Xid,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Branch requests (coordinator → resource adapters / remote handler)
    // ═══════════════════════════════════════════════════════════════════════
    PrepareBranchRequested {
        xid: Xid,
        branch: Xid,
        participant: Participant,
    },

    CommitBranchRequested {
        xid: Xid,
        branch: Xid,
        participant: Participant,
        one_phase: bool,
    },

    RollbackBranchRequested {
        xid: Xid,
        branch: Xid,
        participant: Participant,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Branch replies
    // ═══════════════════════════════════════════════════════════════════════
    BranchPrepared {
        xid: Xid,
        branch: Xid,
        vote: Vote,
    },

    PrepareBranchFailed {
        xid: Xid,
        branch: Xid,
        cause: String,
    },

    BranchCommitted {
        xid: Xid,
        branch: Xid,
    },

    CommitBranchFailed {
        xid: Xid,
        branch: Xid,
        cause: String,
    },

    BranchRolledBack {
        xid: Xid,
        branch: Xid,
    },

    RollbackBranchFailed {
        xid: Xid,
        branch: Xid,
        cause: String,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Remote protocol
    // ═══════════════════════════════════════════════════════════════════════
    /// Inbound message from the remote link transport.
    RemoteMessageReceived {
        from: ServerId,
        message: RemoteMessage,
    },

    /// The transport accepted an outbound message.
    RemoteDelivered {
        to: ServerId,
        message: RemoteMessage,
    },

    /// The transport failed to deliver an outbound message.
    RemoteDeliveryFailed {
        to: ServerId,
        message: RemoteMessage,
        cause: String,
    },

    RemoteOrderToPrepare {
        xid: Xid,
        superior: ServerId,
    },

    RemoteOrderToCommit {
        xid: Xid,
    },

    RemoteOrderToRollback {
        xid: Xid,
    },

    /// A subordinate transaction has every local branch prepared.
    LocallyPrepared {
        xid: Xid,
        superior: ServerId,
    },

    /// A subordinate transaction has every local branch finished.
    LocallyCompleted {
        xid: Xid,
        superior: ServerId,
        outcome: Outcome,
    },

    /// The superior acknowledged the done report; the transaction can go.
    SuperiorNotified {
        xid: Xid,
    },

    /// Ask a silent subordinate to re-send its status.
    RemoteRetryRequested {
        xid: Xid,
        subordinate: ServerId,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Watchdog
    // ═══════════════════════════════════════════════════════════════════════
    /// A transaction entered the registry; arm its deadline.
    TransactionBegun {
        xid: Xid,
        timeout: Duration,
    },

    /// A transaction left the registry; cancel its timers.
    TransactionFinished {
        xid: Xid,
    },

    /// A post-decision operation failed and should be retried.
    RetryRequested {
        xid: Xid,
        target: RetryTarget,
        cause: String,
    },

    /// The retry interval for `target` elapsed.
    RetryDue {
        xid: Xid,
        target: RetryTarget,
    },

    /// A timer set via `Action::SetTimer` expired.
    TimerFired {
        id: TimerId,
    },

    TransactionTimedOut {
        xid: Xid,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Outcomes delivered to clients
    // ═══════════════════════════════════════════════════════════════════════
    TransactionCommitted {
        xid: Xid,
    },

    TransactionRolledBack {
        xid: Xid,
        reason: RollbackReason,
    },

    /// A branch voted against the commit; every branch was rolled back.
    TransactionFailedToPrepare {
        xid: Xid,
        branch: Xid,
        cause: String,
    },

    /// The transaction is stuck and needs external reconciliation.
    FatalAnomaly {
        xid: Xid,
        anomaly: Anomaly,
    },

    RequestRejected {
        xid: Xid,
        violation: ProtocolViolation,
    },
}

/// Payload-free tag of an [`Event`] variant, used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    BeginTransaction,
    RegisterBranch,
    SubmitCommit,
    SubmitRollback,
    OperatorRetry,
    PrepareBranchRequested,
    CommitBranchRequested,
    RollbackBranchRequested,
    BranchPrepared,
    PrepareBranchFailed,
    BranchCommitted,
    CommitBranchFailed,
    BranchRolledBack,
    RollbackBranchFailed,
    RemoteMessageReceived,
    RemoteDelivered,
    RemoteDeliveryFailed,
    RemoteOrderToPrepare,
    RemoteOrderToCommit,
    RemoteOrderToRollback,
    LocallyPrepared,
    LocallyCompleted,
    SuperiorNotified,
    RemoteRetryRequested,
    TransactionBegun,
    TransactionFinished,
    RetryRequested,
    RetryDue,
    TimerFired,
    TransactionTimedOut,
    TransactionCommitted,
    TransactionRolledBack,
    TransactionFailedToPrepare,
    FatalAnomaly,
    RequestRejected,
}

impl EventKind {
    /// Kinds a client sees as the answer to its requests.
    pub const OUTCOMES: &'static [EventKind] = &[
        EventKind::TransactionCommitted,
        EventKind::TransactionRolledBack,
        EventKind::TransactionFailedToPrepare,
        EventKind::FatalAnomaly,
        EventKind::RequestRejected,
    ];

    /// Branch requests handled by a resource adapter.
    pub const BRANCH_REQUESTS: &'static [EventKind] = &[
        EventKind::PrepareBranchRequested,
        EventKind::CommitBranchRequested,
        EventKind::RollbackBranchRequested,
    ];
}

impl Event {
    /// The tag used to route this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::BeginTransaction { .. } => EventKind::BeginTransaction,
            Event::RegisterBranch { .. } => EventKind::RegisterBranch,
            Event::SubmitCommit { .. } => EventKind::SubmitCommit,
            Event::SubmitRollback { .. } => EventKind::SubmitRollback,
            Event::OperatorRetry { .. } => EventKind::OperatorRetry,
            Event::PrepareBranchRequested { .. } => EventKind::PrepareBranchRequested,
            Event::CommitBranchRequested { .. } => EventKind::CommitBranchRequested,
            Event::RollbackBranchRequested { .. } => EventKind::RollbackBranchRequested,
            Event::BranchPrepared { .. } => EventKind::BranchPrepared,
            Event::PrepareBranchFailed { .. } => EventKind::PrepareBranchFailed,
            Event::BranchCommitted { .. } => EventKind::BranchCommitted,
            Event::CommitBranchFailed { .. } => EventKind::CommitBranchFailed,
            Event::BranchRolledBack { .. } => EventKind::BranchRolledBack,
            Event::RollbackBranchFailed { .. } => EventKind::RollbackBranchFailed,
            Event::RemoteMessageReceived { .. } => EventKind::RemoteMessageReceived,
            Event::RemoteDelivered { .. } => EventKind::RemoteDelivered,
            Event::RemoteDeliveryFailed { .. } => EventKind::RemoteDeliveryFailed,
            Event::RemoteOrderToPrepare { .. } => EventKind::RemoteOrderToPrepare,
            Event::RemoteOrderToCommit { .. } => EventKind::RemoteOrderToCommit,
            Event::RemoteOrderToRollback { .. } => EventKind::RemoteOrderToRollback,
            Event::LocallyPrepared { .. } => EventKind::LocallyPrepared,
            Event::LocallyCompleted { .. } => EventKind::LocallyCompleted,
            Event::SuperiorNotified { .. } => EventKind::SuperiorNotified,
            Event::RemoteRetryRequested { .. } => EventKind::RemoteRetryRequested,
            Event::TransactionBegun { .. } => EventKind::TransactionBegun,
            Event::TransactionFinished { .. } => EventKind::TransactionFinished,
            Event::RetryRequested { .. } => EventKind::RetryRequested,
            Event::RetryDue { .. } => EventKind::RetryDue,
            Event::TimerFired { .. } => EventKind::TimerFired,
            Event::TransactionTimedOut { .. } => EventKind::TransactionTimedOut,
            Event::TransactionCommitted { .. } => EventKind::TransactionCommitted,
            Event::TransactionRolledBack { .. } => EventKind::TransactionRolledBack,
            Event::TransactionFailedToPrepare { .. } => EventKind::TransactionFailedToPrepare,
            Event::FatalAnomaly { .. } => EventKind::FatalAnomaly,
            Event::RequestRejected { .. } => EventKind::RequestRejected,
        }
    }

    /// The transaction this event concerns.
    ///
    /// For remote messages this is the xid on the wire, which may be a branch
    /// xid; its global part still identifies the transaction family.
    pub fn xid(&self) -> Option<&Xid> {
        match self {
            Event::BeginTransaction { xid, .. }
            | Event::RegisterBranch { xid, .. }
            | Event::SubmitCommit { xid }
            | Event::SubmitRollback { xid }
            | Event::OperatorRetry { xid }
            | Event::PrepareBranchRequested { xid, .. }
            | Event::CommitBranchRequested { xid, .. }
            | Event::RollbackBranchRequested { xid, .. }
            | Event::BranchPrepared { xid, .. }
            | Event::PrepareBranchFailed { xid, .. }
            | Event::BranchCommitted { xid, .. }
            | Event::CommitBranchFailed { xid, .. }
            | Event::BranchRolledBack { xid, .. }
            | Event::RollbackBranchFailed { xid, .. }
            | Event::RemoteOrderToPrepare { xid, .. }
            | Event::RemoteOrderToCommit { xid }
            | Event::RemoteOrderToRollback { xid }
            | Event::LocallyPrepared { xid, .. }
            | Event::LocallyCompleted { xid, .. }
            | Event::SuperiorNotified { xid }
            | Event::RemoteRetryRequested { xid, .. }
            | Event::TransactionBegun { xid, .. }
            | Event::TransactionFinished { xid }
            | Event::RetryRequested { xid, .. }
            | Event::RetryDue { xid, .. }
            | Event::TransactionTimedOut { xid }
            | Event::TransactionCommitted { xid }
            | Event::TransactionRolledBack { xid, .. }
            | Event::TransactionFailedToPrepare { xid, .. }
            | Event::FatalAnomaly { xid, .. }
            | Event::RequestRejected { xid, .. } => Some(xid),
            Event::RemoteMessageReceived { message, .. }
            | Event::RemoteDelivered { message, .. }
            | Event::RemoteDeliveryFailed { message, .. } => message.xid(),
            Event::TimerFired { id } => Some(id.xid()),
        }
    }

    /// Whether this event answers a client request.
    pub fn is_outcome(&self) -> bool {
        EventKind::OUTCOMES.contains(&self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xachain_types::test_utils::{test_branch, test_xid};

    #[test]
    fn test_kind_and_xid() {
        let xid = test_xid(1);
        let branch = test_branch(&xid, 1);

        let event = Event::BranchPrepared {
            xid: xid.clone(),
            branch,
            vote: Vote::Commit,
        };
        assert_eq!(event.kind(), EventKind::BranchPrepared);
        assert_eq!(event.xid(), Some(&xid));
        assert!(!event.is_outcome());

        let committed = Event::TransactionCommitted { xid: xid.clone() };
        assert!(committed.is_outcome());
    }

    #[test]
    fn test_remote_events_route_by_wire_xid() {
        let xid = test_xid(2);
        let branch = test_branch(&xid, 3);
        let event = Event::RemoteMessageReceived {
            from: ServerId::new("tm-sub"),
            message: RemoteMessage::ready(branch.clone()),
        };
        assert_eq!(event.xid(), Some(&branch));
        assert_eq!(event.xid().map(Xid::route_key), Some(xid.route_key()));

        let retry = Event::RemoteMessageReceived {
            from: ServerId::new("tm-sup"),
            message: RemoteMessage::retry_request(ServerId::new("tm-sup")),
        };
        assert_eq!(retry.xid(), None);
    }
}
