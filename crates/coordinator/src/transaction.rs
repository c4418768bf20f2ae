//! The per-transaction record kept in the registry.

use crate::trackers::PrepareTally;
use indexmap::IndexMap;
use std::time::Duration;
use tracing::warn;
use xachain_core::{Participant, RollbackReason};
use xachain_types::{BranchState, Decision, ServerId, TransactionRole, TransactionState, Xid};

/// One enlisted participant.
#[derive(Debug, Clone)]
pub struct Branch {
    pub xid: Xid,
    pub participant: Participant,
    pub state: BranchState,
}

/// A global transaction and its branches.
///
/// All mutation goes through the registry's per-transaction lock. State
/// changes are checked: an illegal transition is logged and refused, never
/// applied.
#[derive(Debug, Clone)]
pub struct Transaction {
    xid: Xid,
    role: TransactionRole,
    superior: Option<ServerId>,
    state: TransactionState,
    /// Branches in registration order.
    branches: IndexMap<Xid, Branch>,
    tally: PrepareTally,
    decision: Option<Decision>,
    rollback_reason: Option<RollbackReason>,
    one_phase: bool,
    created_at: Duration,
    timeout: Duration,
}

impl Transaction {
    pub fn new(
        xid: Xid,
        superior: Option<ServerId>,
        created_at: Duration,
        timeout: Duration,
    ) -> Self {
        let role = if superior.is_some() {
            TransactionRole::Subordinate
        } else {
            TransactionRole::Superior
        };
        Self {
            xid,
            role,
            superior,
            state: TransactionState::Active,
            branches: IndexMap::new(),
            tally: PrepareTally::new(),
            decision: None,
            rollback_reason: None,
            one_phase: false,
            created_at,
            timeout,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn xid(&self) -> &Xid {
        &self.xid
    }

    pub fn role(&self) -> TransactionRole {
        self.role
    }

    /// The remote coordinator this transaction reports to, if any.
    pub fn superior(&self) -> Option<&ServerId> {
        self.superior.as_ref()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn decision(&self) -> Option<Decision> {
        self.decision
    }

    pub fn rollback_reason(&self) -> Option<&RollbackReason> {
        self.rollback_reason.as_ref()
    }

    /// Whether the single branch is being committed in one phase.
    pub fn is_one_phase(&self) -> bool {
        self.one_phase
    }

    pub fn created_at(&self) -> Duration {
        self.created_at
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Duration {
        self.created_at + self.timeout
    }

    pub fn branch(&self, branch: &Xid) -> Option<&Branch> {
        self.branches.get(branch)
    }

    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn has_remote_branches(&self) -> bool {
        self.branches.values().any(|b| b.participant.is_remote())
    }

    /// Every branch has reached a terminal state.
    pub fn all_branches_terminal(&self) -> bool {
        self.branches.values().all(|b| b.state.is_terminal())
    }

    /// Branches in one of `states`, cloned so the caller can keep mutating.
    pub fn branches_in(&self, states: &[BranchState]) -> Vec<Branch> {
        self.branches
            .values()
            .filter(|b| states.contains(&b.state))
            .cloned()
            .collect()
    }

    pub fn tally(&self) -> &PrepareTally {
        &self.tally
    }

    pub(crate) fn tally_mut(&mut self) -> &mut PrepareTally {
        &mut self.tally
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mutation
    // ═══════════════════════════════════════════════════════════════════════

    /// Move the transaction forward. Returns `false` and leaves the state
    /// alone if the move would regress or cross the decision.
    pub(crate) fn advance(&mut self, next: TransactionState) -> bool {
        if !self.state.can_advance_to(next) {
            if self.state != next {
                warn!(
                    xid = %self.xid,
                    from = %self.state,
                    to = %next,
                    "Refusing illegal transaction state change"
                );
            }
            return false;
        }
        self.state = next;
        true
    }

    /// Move a branch forward. Returns `false` for an unknown branch or an
    /// illegal transition.
    pub(crate) fn set_branch_state(&mut self, branch: &Xid, next: BranchState) -> bool {
        let Some(entry) = self.branches.get_mut(branch) else {
            return false;
        };
        if !entry.state.can_transition_to(next) {
            warn!(
                xid = %self.xid,
                branch = %branch,
                from = %entry.state,
                to = %next,
                "Refusing illegal branch state change"
            );
            return false;
        }
        entry.state = next;
        true
    }

    /// Record the decision. The first decision is final.
    pub(crate) fn decide(&mut self, decision: Decision, reason: Option<RollbackReason>) {
        if self.decision.is_none() {
            self.decision = Some(decision);
            self.rollback_reason = reason;
        }
    }

    pub(crate) fn set_one_phase(&mut self) {
        self.one_phase = true;
    }

    /// Attach the remote superior that sent the first order.
    pub(crate) fn attach_superior(&mut self, superior: ServerId) {
        self.role = self.role.with_superior(self.has_remote_branches());
        self.superior = Some(superior);
    }

    pub(crate) fn add_branch(&mut self, branch: Xid, participant: Participant) {
        if participant.is_remote() {
            self.role = self.role.with_remote_branch();
        }
        self.branches.insert(
            branch.clone(),
            Branch {
                xid: branch,
                participant,
                state: BranchState::Registered,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xachain_types::test_utils::{test_branch, test_xid};

    #[test]
    fn test_role_follows_chaining() {
        let xid = test_xid(1);
        let mut tx = Transaction::new(xid.clone(), None, Duration::ZERO, Duration::from_secs(5));
        assert_eq!(tx.role(), TransactionRole::Superior);

        tx.add_branch(
            test_branch(&xid, 1),
            Participant::Remote(ServerId::new("tm-b")),
        );
        assert_eq!(tx.role(), TransactionRole::Superior);

        tx.attach_superior(ServerId::new("tm-root"));
        assert_eq!(tx.role(), TransactionRole::Both);
        assert_eq!(tx.superior(), Some(&ServerId::new("tm-root")));
    }

    #[test]
    fn test_illegal_changes_are_refused() {
        let xid = test_xid(1);
        let branch = test_branch(&xid, 1);
        let mut tx = Transaction::new(xid, None, Duration::ZERO, Duration::from_secs(5));
        tx.add_branch(branch.clone(), Participant::Remote(ServerId::new("tm-b")));

        assert!(tx.advance(TransactionState::Preparing));
        assert!(tx.advance(TransactionState::Committing));
        assert!(!tx.advance(TransactionState::RollingBack));
        assert_eq!(tx.state(), TransactionState::Committing);

        assert!(!tx.set_branch_state(&branch, BranchState::Committing));
        assert!(tx.set_branch_state(&branch, BranchState::Preparing));
        assert!(tx.set_branch_state(&branch, BranchState::Prepared));
        assert!(tx.set_branch_state(&branch, BranchState::Committing));
        assert!(!tx.set_branch_state(&branch, BranchState::RollingBack));
    }

    #[test]
    fn test_first_decision_is_final() {
        let mut tx = Transaction::new(test_xid(1), None, Duration::ZERO, Duration::from_secs(5));
        tx.decide(Decision::Rollback, Some(RollbackReason::Timeout));
        tx.decide(Decision::Commit, None);
        assert_eq!(tx.decision(), Some(Decision::Rollback));
        assert_eq!(tx.rollback_reason(), Some(&RollbackReason::Timeout));
    }
}
