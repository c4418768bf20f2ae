//! Protocol states for transactions and their branches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A branch's answer to `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vote {
    /// Prepared; the branch will commit when told to.
    Commit,
    /// The branch made no changes and needs no second phase.
    ReadOnly,
}

/// The single transaction-wide decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Commit,
    Rollback,
}

impl Decision {
    /// The outcome a branch reaches under this decision.
    pub fn outcome(self) -> Outcome {
        match self {
            Decision::Commit => Outcome::Committed,
            Decision::Rollback => Outcome::RolledBack,
        }
    }
}

/// Final outcome of a transaction or branch, as reported across a remote link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Committed,
    RolledBack,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Committed => write!(f, "committed"),
            Outcome::RolledBack => write!(f, "rolled-back"),
        }
    }
}

/// Position of this coordinator in a chain of coordinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionRole {
    /// Root of the chain; decides the outcome.
    Superior,
    /// Branch of a remote superior; waits for its orders.
    Subordinate,
    /// Subordinate that itself drives remote subordinates.
    Both,
}

impl TransactionRole {
    /// Role after a remote subordinate joins as a branch.
    pub fn with_remote_branch(self) -> Self {
        match self {
            TransactionRole::Subordinate | TransactionRole::Both => TransactionRole::Both,
            TransactionRole::Superior => TransactionRole::Superior,
        }
    }

    /// Role after a remote superior is attached.
    pub fn with_superior(self, has_remote_branches: bool) -> Self {
        if has_remote_branches {
            TransactionRole::Both
        } else {
            TransactionRole::Subordinate
        }
    }

    pub fn is_subordinate(self) -> bool {
        matches!(self, TransactionRole::Subordinate | TransactionRole::Both)
    }
}

/// Overall state of a transaction.
///
/// Monotonic: a transaction only moves forward, and never crosses from the
/// commit side to the rollback side or back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// Accepting branch registrations.
    Active,
    /// Prepare requests are outstanding.
    Preparing,
    /// Every branch prepared; a subordinate waits here for its superior.
    Prepared,
    /// Commit decided; commit requests are outstanding.
    Committing,
    /// Rollback decided; rollback requests are outstanding.
    RollingBack,
    Committed,
    RolledBack,
}

impl TransactionState {
    fn rank(self) -> u8 {
        match self {
            TransactionState::Active => 0,
            TransactionState::Preparing => 1,
            TransactionState::Prepared => 2,
            TransactionState::Committing | TransactionState::RollingBack => 3,
            TransactionState::Committed | TransactionState::RolledBack => 4,
        }
    }

    fn decision(self) -> Option<Decision> {
        match self {
            TransactionState::Committing | TransactionState::Committed => Some(Decision::Commit),
            TransactionState::RollingBack | TransactionState::RolledBack => {
                Some(Decision::Rollback)
            }
            _ => None,
        }
    }

    /// Whether moving to `next` keeps the state monotonic.
    pub fn can_advance_to(self, next: TransactionState) -> bool {
        if next.rank() <= self.rank() {
            return false;
        }
        match (self.decision(), next.decision()) {
            (Some(current), Some(target)) => current == target,
            _ => true,
        }
    }

    /// Committed or rolled back.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack
        )
    }

    /// No decision has been taken yet.
    pub fn is_undecided(self) -> bool {
        self.decision().is_none()
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Active => "active",
            TransactionState::Preparing => "preparing",
            TransactionState::Prepared => "prepared",
            TransactionState::Committing => "committing",
            TransactionState::RollingBack => "rolling-back",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled-back",
        };
        f.write_str(name)
    }
}

/// State of one resource's participation in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchState {
    Registered,
    /// Prepare (or a one-phase commit) is outstanding.
    Preparing,
    Prepared,
    PrepareFailed,
    Committing,
    RollingBack,
    Committed,
    RolledBack,
    /// Forgotten, or voted read-only.
    Done,
}

impl BranchState {
    /// Whether the branch protocol allows moving to `next`.
    pub fn can_transition_to(self, next: BranchState) -> bool {
        use BranchState::*;
        matches!(
            (self, next),
            (Registered, Preparing)
                | (Registered, RollingBack)
                | (Preparing, Prepared)
                | (Preparing, PrepareFailed)
                | (Preparing, Done)
                | (Preparing, Committed)
                | (Preparing, RollingBack)
                | (Prepared, Committing)
                | (Prepared, RollingBack)
                | (PrepareFailed, RollingBack)
                | (Committing, Committed)
                | (RollingBack, RolledBack)
                | (Committed, Done)
                | (RolledBack, Done)
        )
    }

    /// The branch needs nothing more from its resource.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BranchState::Committed | BranchState::RolledBack | BranchState::Done
        )
    }

    /// A request to the resource is outstanding in this state.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            BranchState::Preparing | BranchState::Committing | BranchState::RollingBack
        )
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_state_never_regresses() {
        use TransactionState::*;
        assert!(Active.can_advance_to(Preparing));
        assert!(Preparing.can_advance_to(Committing));
        assert!(Preparing.can_advance_to(RollingBack));
        assert!(Prepared.can_advance_to(Committing));
        assert!(Committing.can_advance_to(Committed));

        assert!(!Committing.can_advance_to(Preparing));
        assert!(!Committing.can_advance_to(RollingBack));
        assert!(!Committing.can_advance_to(RolledBack));
        assert!(!RollingBack.can_advance_to(Committed));
        assert!(!Committed.can_advance_to(Committed));
    }

    #[test]
    fn test_branch_decisions_do_not_cross() {
        use BranchState::*;
        assert!(Prepared.can_transition_to(Committing));
        assert!(PrepareFailed.can_transition_to(RollingBack));
        assert!(!PrepareFailed.can_transition_to(Committing));
        assert!(!Committing.can_transition_to(RollingBack));
        assert!(!RollingBack.can_transition_to(Committed));
        assert!(!Committed.can_transition_to(Preparing));
    }

    #[test]
    fn test_role_upgrades() {
        assert_eq!(
            TransactionRole::Subordinate.with_remote_branch(),
            TransactionRole::Both
        );
        assert_eq!(
            TransactionRole::Superior.with_remote_branch(),
            TransactionRole::Superior
        );
        assert_eq!(
            TransactionRole::Superior.with_superior(true),
            TransactionRole::Both
        );
        assert!(TransactionRole::Both.is_subordinate());
    }
}
