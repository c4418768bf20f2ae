//! Prepare vote tally.
//!
//! Collects the replies to the prepare fan-out. Replies are keyed by branch,
//! so a duplicate reply (a redelivered event, a re-sent ready report) never
//! counts twice and the first reply from a branch is the one that stands.

use std::collections::{BTreeMap, BTreeSet};
use xachain_types::{Vote, Xid};

/// Result of a complete tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyResult {
    /// Every expected branch voted to commit or read-only.
    AllPrepared { read_only: usize },
    /// A branch failed to prepare. Carries the first failure recorded.
    Rejected { branch: Xid, cause: String },
}

/// Tracks prepare votes for one transaction.
#[derive(Debug, Clone, Default)]
pub struct PrepareTally {
    /// Branches a prepare request went out to.
    expected: BTreeSet<Xid>,
    /// Successful votes per branch.
    votes: BTreeMap<Xid, Vote>,
    /// Failures per branch, in arrival order of the first.
    failures: Vec<(Xid, String)>,
}

impl PrepareTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect a reply from `branch`.
    pub fn expect(&mut self, branch: Xid) {
        self.expected.insert(branch);
    }

    /// Record a vote.
    ///
    /// Returns `false` if the branch is not expected or already replied.
    pub fn record_vote(&mut self, branch: &Xid, vote: Vote) -> bool {
        if !self.accepts(branch) {
            return false;
        }
        self.votes.insert(branch.clone(), vote);
        true
    }

    /// Record a prepare failure.
    ///
    /// Returns `false` if the branch is not expected or already replied.
    pub fn record_failure(&mut self, branch: &Xid, cause: impl Into<String>) -> bool {
        if !self.accepts(branch) {
            return false;
        }
        self.failures.push((branch.clone(), cause.into()));
        true
    }

    fn accepts(&self, branch: &Xid) -> bool {
        self.expected.contains(branch)
            && !self.votes.contains_key(branch)
            && !self.failures.iter().any(|(b, _)| b == branch)
    }

    /// The verdict, once it is known.
    ///
    /// A single failure decides the tally immediately; success needs a vote
    /// from every expected branch.
    pub fn check(&self) -> Option<TallyResult> {
        if let Some((branch, cause)) = self.failures.first() {
            return Some(TallyResult::Rejected {
                branch: branch.clone(),
                cause: cause.clone(),
            });
        }
        if self.votes.len() == self.expected.len() {
            let read_only = self
                .votes
                .values()
                .filter(|vote| **vote == Vote::ReadOnly)
                .count();
            return Some(TallyResult::AllPrepared { read_only });
        }
        None
    }

    /// Number of branches a reply is expected from.
    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }

    /// Number of replies recorded so far.
    pub fn replies(&self) -> usize {
        self.votes.len() + self.failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xachain_types::test_utils::{test_branch, test_xid};

    #[test]
    fn test_complete_only_when_every_branch_voted() {
        let xid = test_xid(1);
        let (a, b) = (test_branch(&xid, 1), test_branch(&xid, 2));
        let mut tally = PrepareTally::new();
        tally.expect(a.clone());
        tally.expect(b.clone());

        assert!(tally.record_vote(&a, Vote::Commit));
        assert_eq!(tally.check(), None);

        assert!(tally.record_vote(&b, Vote::ReadOnly));
        assert_eq!(tally.check(), Some(TallyResult::AllPrepared { read_only: 1 }));
    }

    #[test]
    fn test_duplicate_reply_is_not_counted() {
        let xid = test_xid(1);
        let (a, b) = (test_branch(&xid, 1), test_branch(&xid, 2));
        let mut tally = PrepareTally::new();
        tally.expect(a.clone());
        tally.expect(b);

        assert!(tally.record_vote(&a, Vote::Commit));
        assert!(!tally.record_vote(&a, Vote::Commit));
        assert!(!tally.record_failure(&a, "late failure"));
        assert_eq!(tally.replies(), 1);
        assert_eq!(tally.check(), None);
    }

    #[test]
    fn test_single_failure_decides() {
        let xid = test_xid(1);
        let (a, b) = (test_branch(&xid, 1), test_branch(&xid, 2));
        let mut tally = PrepareTally::new();
        tally.expect(a.clone());
        tally.expect(b.clone());

        assert!(tally.record_failure(&b, "constraint violated"));
        assert_eq!(
            tally.check(),
            Some(TallyResult::Rejected {
                branch: b,
                cause: "constraint violated".into()
            })
        );
    }

    #[test]
    fn test_unexpected_branch_is_ignored() {
        let xid = test_xid(1);
        let mut tally = PrepareTally::new();
        tally.expect(test_branch(&xid, 1));
        assert!(!tally.record_vote(&test_branch(&xid, 9), Vote::Commit));
        assert_eq!(tally.expected_count(), 1);
    }
}
