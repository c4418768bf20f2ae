//! Outcome vocabulary carried by terminal and rejection events.

use std::fmt;
use thiserror::Error;
use xachain_types::{Outcome, ResourceId, TransactionState, Xid};

/// Why a transaction was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackReason {
    /// The client asked for it.
    Requested,
    /// A branch voted against the commit.
    PrepareFailed { branch: Xid, cause: String },
    /// The deadline expired before every branch prepared.
    Timeout,
    /// The only branch failed its one-phase commit.
    OnePhaseCommitFailed { branch: Xid, cause: String },
    /// The remote superior ordered it.
    SuperiorOrder,
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackReason::Requested => write!(f, "rollback requested"),
            RollbackReason::PrepareFailed { branch, cause } => {
                write!(f, "branch {branch} failed to prepare: {cause}")
            }
            RollbackReason::Timeout => write!(f, "transaction timed out"),
            RollbackReason::OnePhaseCommitFailed { branch, cause } => {
                write!(f, "one-phase commit of {branch} failed: {cause}")
            }
            RollbackReason::SuperiorOrder => write!(f, "superior ordered rollback"),
        }
    }
}

/// Category of a fatal anomaly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyKind {
    /// A branch kept failing to commit after the commit decision.
    CommitRetriesExhausted,
    /// A branch kept failing to roll back after the rollback decision.
    RollbackRetriesExhausted,
    /// An order could not be delivered to a remote subordinate.
    OrderUndeliverable,
    /// A status report could not be delivered to the remote superior.
    ReportUndeliverable,
    /// A subordinate reported an outcome contradicting the decision.
    HeuristicMismatch { expected: Outcome, reported: Outcome },
}

/// A transaction that is stuck and needs external reconciliation.
///
/// The transaction stays in the registry; an operator retry or resource
/// recovery resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    /// The branch involved, if the anomaly is branch-specific.
    pub branch: Option<Xid>,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Last failure observed.
    pub cause: String,
}

/// A request that violates the protocol; rejected without affecting other
/// transactions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("transaction already active")]
    DuplicateTransaction,

    #[error("unknown transaction")]
    UnknownTransaction,

    #[error("branch {0} already registered")]
    DuplicateBranch(Xid),

    #[error("branch {0} does not belong to this transaction")]
    ForeignBranch(Xid),

    #[error("{resource} is already enlisted in transaction {owner}")]
    HandleInUse { resource: ResourceId, owner: Xid },

    #[error("request not allowed while {0}")]
    InvalidState(TransactionState),

    #[error("the outcome of a subordinate transaction is decided by its superior")]
    DecisionOwnedBySuperior,
}
