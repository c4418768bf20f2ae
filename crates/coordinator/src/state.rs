//! Two-phase commit state machine.

use crate::config::CoordinatorConfig;
use crate::error::RegistryError;
use crate::registry::Registry;
use crate::trackers::TallyResult;
use crate::transaction::{Branch, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use xachain_core::{
    Action, Event, EventKind, Participant, ProtocolViolation, RetryTarget, RollbackReason,
    StateMachine,
};
use xachain_types::{BranchState, Decision, ServerId, TransactionState, Vote, Xid};

const SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::BeginTransaction,
    EventKind::RegisterBranch,
    EventKind::SubmitCommit,
    EventKind::SubmitRollback,
    EventKind::OperatorRetry,
    EventKind::BranchPrepared,
    EventKind::PrepareBranchFailed,
    EventKind::BranchCommitted,
    EventKind::CommitBranchFailed,
    EventKind::BranchRolledBack,
    EventKind::RollbackBranchFailed,
    EventKind::RemoteOrderToPrepare,
    EventKind::RemoteOrderToCommit,
    EventKind::RemoteOrderToRollback,
    EventKind::SuperiorNotified,
    EventKind::RetryDue,
    EventKind::TransactionTimedOut,
];

/// Where an event came from, which decides how a failed lookup is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// A client request; failures are answered with `RequestRejected`.
    Client,
    /// A reply or internal event; failures are logged and dropped.
    Protocol,
}

/// Effects of one step on a transaction, collected under its lock.
#[derive(Default)]
struct Step {
    actions: Vec<Action>,
    /// Remove the transaction from the registry once the lock is released.
    release: bool,
}

impl Step {
    fn publish(&mut self, event: Event) {
        self.actions.push(Action::publish(event));
    }

    fn merge(&mut self, other: Step) {
        self.actions.extend(other.actions);
        self.release |= other.release;
    }
}

/// Drives transactions through two-phase commit.
///
/// Holds no transaction state of its own: every record lives in the shared
/// [`Registry`] and is mutated under its lock, so several coordinators can run
/// as a worker pool keyed by xid.
pub struct TwoPhaseCoordinator {
    registry: Arc<Registry>,
    config: CoordinatorConfig,
    now: Duration,
}

impl TwoPhaseCoordinator {
    pub fn new(registry: Arc<Registry>, config: CoordinatorConfig) -> Self {
        Self {
            registry,
            config,
            now: Duration::ZERO,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Client requests
    // ═══════════════════════════════════════════════════════════════════════

    fn on_begin(
        &mut self,
        xid: Xid,
        superior: Option<ServerId>,
        timeout: Option<Duration>,
    ) -> Vec<Action> {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let transaction = Transaction::new(xid.clone(), superior.clone(), self.now, timeout);
        match self.registry.begin(transaction) {
            Ok(()) => {
                info!(
                    xid = %xid,
                    superior = ?superior,
                    timeout_ms = timeout.as_millis() as u64,
                    "Transaction begun"
                );
                vec![Action::publish(Event::TransactionBegun { xid, timeout })]
            }
            Err(e) => rejection(xid, e.into_violation()),
        }
    }

    fn on_register_branch(
        &mut self,
        xid: Xid,
        branch: Xid,
        participant: Participant,
    ) -> Vec<Action> {
        match self.registry.register_branch(&xid, branch, participant) {
            Ok(()) => vec![],
            Err(e) => rejection(xid, e.into_violation()),
        }
    }

    fn on_submit_commit(&mut self, xid: Xid) -> Vec<Action> {
        self.apply(&xid, Origin::Client, |this, tx| {
            if tx.superior().is_some() {
                return Err(ProtocolViolation::DecisionOwnedBySuperior);
            }
            if tx.state() != TransactionState::Active {
                return Err(ProtocolViolation::InvalidState(tx.state()));
            }
            Ok(this.start_prepare(tx))
        })
    }

    fn on_submit_rollback(&mut self, xid: Xid) -> Vec<Action> {
        self.apply(&xid, Origin::Client, |this, tx| {
            if tx.superior().is_some() {
                return Err(ProtocolViolation::DecisionOwnedBySuperior);
            }
            if !tx.state().is_undecided() {
                return Err(ProtocolViolation::InvalidState(tx.state()));
            }
            Ok(this.begin_rollback(tx, RollbackReason::Requested))
        })
    }

    fn on_operator_retry(&mut self, xid: Xid) -> Vec<Action> {
        self.apply(&xid, Origin::Client, |this, tx| {
            info!(xid = %tx.xid(), state = %tx.state(), "Operator retry");
            Ok(this.redrive(tx))
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Branch replies
    // ═══════════════════════════════════════════════════════════════════════

    fn on_branch_prepared(&mut self, xid: Xid, branch: Xid, vote: Vote) -> Vec<Action> {
        self.apply(&xid, Origin::Protocol, |this, tx| {
            let Some(branch_state) = branch_state(tx, &branch) else {
                return Ok(Step::default());
            };
            if tx.state() != TransactionState::Preparing
                || branch_state != BranchState::Preparing
                || tx.is_one_phase()
                || !tx.tally_mut().record_vote(&branch, vote)
            {
                debug!(
                    xid = %xid,
                    branch = %branch,
                    state = %tx.state(),
                    branch_state = %branch_state,
                    "Ignoring late or duplicate prepare vote"
                );
                return Ok(Step::default());
            }

            let next = match vote {
                Vote::Commit => BranchState::Prepared,
                Vote::ReadOnly => BranchState::Done,
            };
            tx.set_branch_state(&branch, next);
            debug!(
                xid = %xid,
                branch = %branch,
                ?vote,
                replies = tx.tally().replies(),
                expected = tx.tally().expected_count(),
                "Prepare vote recorded"
            );

            Ok(match tx.tally().check() {
                Some(TallyResult::AllPrepared { read_only }) => this.all_prepared(tx, read_only),
                Some(TallyResult::Rejected { .. }) | None => Step::default(),
            })
        })
    }

    fn on_prepare_failed(&mut self, xid: Xid, branch: Xid, cause: String) -> Vec<Action> {
        self.apply(&xid, Origin::Protocol, |this, tx| {
            let Some(branch_state) = branch_state(tx, &branch) else {
                return Ok(Step::default());
            };
            match tx.state() {
                TransactionState::Committing | TransactionState::Committed => {
                    warn!(
                        xid = %xid,
                        branch = %branch,
                        cause = %cause,
                        "Ignoring prepare failure after the commit decision"
                    );
                    Ok(Step::default())
                }
                // A subordinate that gave up before prepare reports it early.
                TransactionState::Active if branch_state == BranchState::Registered => {
                    info!(xid = %xid, branch = %branch, cause = %cause, "Branch rolled back before prepare");
                    Ok(this.begin_rollback(tx, RollbackReason::PrepareFailed { branch, cause }))
                }
                TransactionState::Preparing
                    if branch_state == BranchState::Preparing && !tx.is_one_phase() =>
                {
                    if !tx.tally_mut().record_failure(&branch, cause.clone()) {
                        return Ok(Step::default());
                    }
                    tx.set_branch_state(&branch, BranchState::PrepareFailed);
                    info!(xid = %xid, branch = %branch, cause = %cause, "Branch failed to prepare");
                    Ok(this.begin_rollback(tx, RollbackReason::PrepareFailed { branch, cause }))
                }
                state => {
                    debug!(xid = %xid, branch = %branch, state = %state, "Ignoring prepare failure");
                    Ok(Step::default())
                }
            }
        })
    }

    fn on_branch_committed(&mut self, xid: Xid, branch: Xid) -> Vec<Action> {
        self.apply(&xid, Origin::Protocol, |this, tx| {
            let Some(branch_state) = branch_state(tx, &branch) else {
                return Ok(Step::default());
            };
            match branch_state {
                BranchState::Committing => {
                    tx.set_branch_state(&branch, BranchState::Committed);
                    debug!(xid = %xid, branch = %branch, "Branch committed");
                    Ok(this.complete_if_finished(tx))
                }
                BranchState::Preparing if tx.is_one_phase() => {
                    tx.set_branch_state(&branch, BranchState::Committed);
                    tx.decide(Decision::Commit, None);
                    Ok(this.complete(tx))
                }
                _ => {
                    debug!(xid = %xid, branch = %branch, branch_state = %branch_state, "Ignoring duplicate commit reply");
                    Ok(Step::default())
                }
            }
        })
    }

    fn on_commit_failed(&mut self, xid: Xid, branch: Xid, cause: String) -> Vec<Action> {
        self.apply(&xid, Origin::Protocol, |this, tx| {
            let Some(branch_state) = branch_state(tx, &branch) else {
                return Ok(Step::default());
            };
            let mut step = Step::default();
            match branch_state {
                BranchState::Preparing if tx.is_one_phase() => {
                    tx.set_branch_state(&branch, BranchState::PrepareFailed);
                    warn!(xid = %xid, branch = %branch, cause = %cause, "One-phase commit failed");
                    step = this.begin_rollback(
                        tx,
                        RollbackReason::OnePhaseCommitFailed { branch, cause },
                    );
                }
                BranchState::Committing => {
                    warn!(xid = %xid, branch = %branch, cause = %cause, "Branch commit failed, scheduling retry");
                    step.publish(Event::RetryRequested {
                        xid: xid.clone(),
                        target: RetryTarget::Commit(branch),
                        cause,
                    });
                }
                _ => {
                    debug!(xid = %xid, branch = %branch, branch_state = %branch_state, "Ignoring commit failure");
                }
            }
            Ok(step)
        })
    }

    fn on_branch_rolled_back(&mut self, xid: Xid, branch: Xid) -> Vec<Action> {
        self.apply(&xid, Origin::Protocol, |this, tx| {
            if branch_state(tx, &branch) != Some(BranchState::RollingBack) {
                debug!(xid = %xid, branch = %branch, "Ignoring duplicate rollback reply");
                return Ok(Step::default());
            }
            tx.set_branch_state(&branch, BranchState::RolledBack);
            debug!(xid = %xid, branch = %branch, "Branch rolled back");
            Ok(this.complete_if_finished(tx))
        })
    }

    fn on_rollback_failed(&mut self, xid: Xid, branch: Xid, cause: String) -> Vec<Action> {
        self.apply(&xid, Origin::Protocol, |_, tx| {
            let mut step = Step::default();
            if branch_state(tx, &branch) == Some(BranchState::RollingBack) {
                warn!(xid = %xid, branch = %branch, cause = %cause, "Branch rollback failed, scheduling retry");
                step.publish(Event::RetryRequested {
                    xid: xid.clone(),
                    target: RetryTarget::Rollback(branch),
                    cause,
                });
            }
            Ok(step)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Remote orders
    // ═══════════════════════════════════════════════════════════════════════

    fn on_remote_order_to_prepare(&mut self, xid: Xid, superior: ServerId) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.registry.contains(&xid) {
            let timeout = self.config.default_timeout;
            let transaction =
                Transaction::new(xid.clone(), Some(superior.clone()), self.now, timeout);
            if self.registry.begin(transaction).is_ok() {
                info!(xid = %xid, superior = %superior, "Subordinate transaction created by prepare order");
                actions.push(Action::publish(Event::TransactionBegun {
                    xid: xid.clone(),
                    timeout,
                }));
            }
        }

        actions.extend(self.apply(&xid, Origin::Protocol, |this, tx| {
            match tx.superior().cloned() {
                None => tx.attach_superior(superior.clone()),
                Some(current) if current != superior => {
                    warn!(
                        xid = %xid,
                        superior = %current,
                        from = %superior,
                        "Prepare order from a server that is not the superior"
                    );
                    return Ok(Step::default());
                }
                Some(_) => {}
            }

            let mut step = Step::default();
            match tx.state() {
                TransactionState::Active => step = this.start_prepare(tx),
                TransactionState::Prepared => step.publish(Event::LocallyPrepared {
                    xid: xid.clone(),
                    superior,
                }),
                TransactionState::Committed | TransactionState::RolledBack => {
                    step.actions.extend(completion_report(tx));
                }
                TransactionState::Preparing
                | TransactionState::Committing
                | TransactionState::RollingBack => {}
            }
            Ok(step)
        }));
        actions
    }

    fn on_remote_order_to_commit(&mut self, xid: Xid) -> Vec<Action> {
        self.apply(&xid, Origin::Protocol, |this, tx| {
            let mut step = Step::default();
            match tx.state() {
                TransactionState::Prepared => step = this.decide_commit(tx),
                TransactionState::Committing => {}
                TransactionState::Committed => step.actions.extend(completion_report(tx)),
                TransactionState::RollingBack | TransactionState::RolledBack => {
                    warn!(xid = %xid, state = %tx.state(), "Commit ordered for a rolled-back transaction");
                    step.actions.extend(completion_report(tx));
                }
                TransactionState::Active | TransactionState::Preparing => {
                    warn!(xid = %xid, state = %tx.state(), "Commit ordered before prepare completed");
                }
            }
            Ok(step)
        })
    }

    fn on_remote_order_to_rollback(&mut self, xid: Xid) -> Vec<Action> {
        self.apply(&xid, Origin::Protocol, |this, tx| {
            let mut step = Step::default();
            match tx.state() {
                TransactionState::Active
                | TransactionState::Preparing
                | TransactionState::Prepared => {
                    step = this.begin_rollback(tx, RollbackReason::SuperiorOrder);
                }
                TransactionState::RollingBack => {}
                TransactionState::RolledBack => step.actions.extend(completion_report(tx)),
                TransactionState::Committing | TransactionState::Committed => {
                    warn!(xid = %xid, state = %tx.state(), "Rollback ordered for a committed transaction");
                    step.actions.extend(completion_report(tx));
                }
            }
            Ok(step)
        })
    }

    fn on_superior_notified(&mut self, xid: Xid) -> Vec<Action> {
        self.apply(&xid, Origin::Protocol, |_, tx| {
            let mut step = Step::default();
            if tx.state().is_terminal() {
                debug!(xid = %xid, "Superior acknowledged completion");
                step.release = true;
            }
            Ok(step)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Watchdog
    // ═══════════════════════════════════════════════════════════════════════

    fn on_retry_due(&mut self, xid: Xid, target: RetryTarget) -> Vec<Action> {
        let (branch, expected) = match target {
            RetryTarget::Commit(branch) => (branch, BranchState::Committing),
            RetryTarget::Rollback(branch) => (branch, BranchState::RollingBack),
            // Delivery retries belong to the remote handler.
            RetryTarget::Order(_) | RetryTarget::Report => return vec![],
        };
        self.apply(&xid, Origin::Protocol, |_, tx| {
            let mut step = Step::default();
            if let Some(entry) = tx.branch(&branch).filter(|b| b.state == expected) {
                debug!(xid = %xid, branch = %branch, "Retrying branch");
                step.publish(phase_two_request(&xid, entry));
            }
            Ok(step)
        })
    }

    fn on_timeout(&mut self, xid: Xid) -> Vec<Action> {
        self.apply(&xid, Origin::Protocol, |this, tx| {
            let mut step = Step::default();
            match tx.state() {
                TransactionState::Preparing if tx.is_one_phase() => {
                    debug!(xid = %xid, "One-phase commit still outstanding at deadline");
                }
                TransactionState::Active | TransactionState::Preparing => {
                    info!(xid = %xid, state = %tx.state(), "Transaction timed out, rolling back");
                    step = this.begin_rollback(tx, RollbackReason::Timeout);
                }
                TransactionState::Prepared => match tx.superior().cloned() {
                    Some(superior) => {
                        info!(xid = %xid, superior = %superior, "Prepared past deadline, re-reporting ready");
                        step.publish(Event::LocallyPrepared {
                            xid: xid.clone(),
                            superior,
                        });
                    }
                    None => step = this.decide_commit(tx),
                },
                TransactionState::Committing | TransactionState::RollingBack => {
                    for branch in tx.branches_in(&[BranchState::Committing, BranchState::RollingBack]) {
                        if let Some(server) = branch.participant.as_remote() {
                            // A subordinate that already forgot the branch
                            // answers the repeated order with its done report.
                            debug!(xid = %xid, branch = %branch.xid, subordinate = %server, "Re-ordering silent subordinate");
                            step.publish(phase_two_request(&xid, &branch));
                            step.publish(Event::RemoteRetryRequested {
                                xid: xid.clone(),
                                subordinate: server.clone(),
                            });
                        }
                    }
                }
                TransactionState::Committed | TransactionState::RolledBack => {
                    step.actions.extend(completion_report(tx));
                }
            }
            Ok(step)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Protocol steps
    // ═══════════════════════════════════════════════════════════════════════

    /// Fan prepare requests out to every registered branch.
    fn start_prepare(&self, tx: &mut Transaction) -> Step {
        let mut step = Step::default();
        tx.advance(TransactionState::Preparing);
        let branches = tx.branches_in(&[BranchState::Registered]);

        if branches.is_empty() {
            return self.all_prepared(tx, 0);
        }

        if let [only] = branches.as_slice() {
            if self.config.one_phase_optimization
                && tx.superior().is_none()
                && !only.participant.is_remote()
            {
                tx.set_one_phase();
                tx.set_branch_state(&only.xid, BranchState::Preparing);
                info!(xid = %tx.xid(), branch = %only.xid, "Committing single branch in one phase");
                step.publish(Event::CommitBranchRequested {
                    xid: tx.xid().clone(),
                    branch: only.xid.clone(),
                    participant: only.participant.clone(),
                    one_phase: true,
                });
                return step;
            }
        }

        for branch in &branches {
            tx.tally_mut().expect(branch.xid.clone());
            tx.set_branch_state(&branch.xid, BranchState::Preparing);
            step.publish(Event::PrepareBranchRequested {
                xid: tx.xid().clone(),
                branch: branch.xid.clone(),
                participant: branch.participant.clone(),
            });
        }
        info!(xid = %tx.xid(), branches = branches.len(), "Prepare started");
        step
    }

    /// Every branch voted; commit, or hand the decision to the superior.
    fn all_prepared(&self, tx: &mut Transaction, read_only: usize) -> Step {
        info!(
            xid = %tx.xid(),
            branches = tx.branch_count(),
            read_only,
            "All branches prepared"
        );
        match tx.superior().cloned() {
            Some(superior) => {
                let mut step = Step::default();
                tx.advance(TransactionState::Prepared);
                step.publish(Event::LocallyPrepared {
                    xid: tx.xid().clone(),
                    superior,
                });
                step
            }
            None => self.decide_commit(tx),
        }
    }

    fn decide_commit(&self, tx: &mut Transaction) -> Step {
        let mut step = Step::default();
        if !tx.advance(TransactionState::Committing) {
            return step;
        }
        tx.decide(Decision::Commit, None);
        info!(xid = %tx.xid(), "Commit decided");
        step.actions.push(Action::RecordDecision {
            xid: tx.xid().clone(),
            decision: Decision::Commit,
        });

        for branch in tx.branches_in(&[BranchState::Prepared]) {
            tx.set_branch_state(&branch.xid, BranchState::Committing);
            step.publish(Event::CommitBranchRequested {
                xid: tx.xid().clone(),
                branch: branch.xid,
                participant: branch.participant,
                one_phase: false,
            });
        }
        step.merge(self.complete_if_finished(tx));
        step
    }

    fn begin_rollback(&self, tx: &mut Transaction, reason: RollbackReason) -> Step {
        let mut step = Step::default();
        if !tx.advance(TransactionState::RollingBack) {
            return step;
        }
        info!(xid = %tx.xid(), reason = %reason, "Rollback decided");
        tx.decide(Decision::Rollback, Some(reason));
        step.actions.push(Action::RecordDecision {
            xid: tx.xid().clone(),
            decision: Decision::Rollback,
        });

        let undo = tx.branches_in(&[
            BranchState::Registered,
            BranchState::Preparing,
            BranchState::Prepared,
            BranchState::PrepareFailed,
        ]);
        for branch in undo {
            tx.set_branch_state(&branch.xid, BranchState::RollingBack);
            step.publish(Event::RollbackBranchRequested {
                xid: tx.xid().clone(),
                branch: branch.xid,
                participant: branch.participant,
            });
        }
        step.merge(self.complete_if_finished(tx));
        step
    }

    fn complete_if_finished(&self, tx: &mut Transaction) -> Step {
        let deciding = matches!(
            tx.state(),
            TransactionState::Committing | TransactionState::RollingBack
        );
        if deciding && tx.all_branches_terminal() {
            self.complete(tx)
        } else {
            Step::default()
        }
    }

    /// Every branch is terminal: publish the outcome.
    fn complete(&self, tx: &mut Transaction) -> Step {
        let mut step = Step::default();
        let Some(decision) = tx.decision() else {
            return step;
        };
        let terminal = match decision {
            Decision::Commit => TransactionState::Committed,
            Decision::Rollback => TransactionState::RolledBack,
        };
        if !tx.advance(terminal) {
            return step;
        }

        let xid = tx.xid().clone();
        let outcome = match (decision, tx.rollback_reason()) {
            (Decision::Commit, _) => Event::TransactionCommitted { xid: xid.clone() },
            (Decision::Rollback, Some(RollbackReason::PrepareFailed { branch, cause })) => {
                Event::TransactionFailedToPrepare {
                    xid: xid.clone(),
                    branch: branch.clone(),
                    cause: cause.clone(),
                }
            }
            (Decision::Rollback, reason) => Event::TransactionRolledBack {
                xid: xid.clone(),
                reason: reason.cloned().unwrap_or(RollbackReason::Requested),
            },
        };
        info!(xid = %xid, outcome = %decision.outcome(), "Transaction completed");
        step.publish(outcome);

        match tx.superior().cloned() {
            Some(superior) => step.publish(Event::LocallyCompleted {
                xid,
                superior,
                outcome: decision.outcome(),
            }),
            None => step.release = true,
        }
        step
    }

    /// Re-issue whatever the transaction is waiting on.
    fn redrive(&self, tx: &mut Transaction) -> Step {
        let mut step = Step::default();
        match tx.state() {
            TransactionState::Committing | TransactionState::RollingBack => {
                for branch in tx.branches_in(&[BranchState::Committing, BranchState::RollingBack]) {
                    step.publish(phase_two_request(tx.xid(), &branch));
                }
            }
            TransactionState::Prepared => {
                if let Some(superior) = tx.superior().cloned() {
                    step.publish(Event::LocallyPrepared {
                        xid: tx.xid().clone(),
                        superior,
                    });
                }
            }
            TransactionState::Committed | TransactionState::RolledBack => {
                step.actions.extend(completion_report(tx));
            }
            TransactionState::Active | TransactionState::Preparing => {
                debug!(xid = %tx.xid(), state = %tx.state(), "Nothing to re-drive");
            }
        }
        step
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Plumbing
    // ═══════════════════════════════════════════════════════════════════════

    /// Run `f` under the transaction's lock, then apply the step's release.
    fn apply<F>(&self, xid: &Xid, origin: Origin, f: F) -> Vec<Action>
    where
        F: FnOnce(&Self, &mut Transaction) -> Result<Step, ProtocolViolation>,
    {
        let result = self
            .registry
            .with_transaction(xid, |tx| f(self, tx))
            .map_err(RegistryError::into_violation)
            .and_then(|inner| inner);

        match result {
            Ok(step) => self.finish(xid, step),
            Err(violation) => match origin {
                Origin::Client => rejection(xid.clone(), violation),
                Origin::Protocol => {
                    debug!(xid = %xid, %violation, "Dropping event");
                    vec![]
                }
            },
        }
    }

    fn finish(&self, xid: &Xid, step: Step) -> Vec<Action> {
        let Step {
            mut actions,
            release,
        } = step;
        if release {
            self.registry.remove(xid);
            actions.push(Action::publish(Event::TransactionFinished { xid: xid.clone() }));
        }
        actions
    }
}

fn rejection(xid: Xid, violation: ProtocolViolation) -> Vec<Action> {
    debug!(xid = %xid, %violation, "Request rejected");
    vec![Action::publish(Event::RequestRejected { xid, violation })]
}

fn branch_state(tx: &Transaction, branch: &Xid) -> Option<BranchState> {
    let state = tx.branch(branch).map(|b| b.state);
    if state.is_none() {
        warn!(xid = %tx.xid(), branch = %branch, "Reply for unknown branch");
    }
    state
}

/// The commit or rollback request matching the branch's current state.
fn phase_two_request(xid: &Xid, branch: &Branch) -> Event {
    match branch.state {
        BranchState::Committing => Event::CommitBranchRequested {
            xid: xid.clone(),
            branch: branch.xid.clone(),
            participant: branch.participant.clone(),
            one_phase: false,
        },
        _ => Event::RollbackBranchRequested {
            xid: xid.clone(),
            branch: branch.xid.clone(),
            participant: branch.participant.clone(),
        },
    }
}

/// `LocallyCompleted` for a finished subordinate; nothing for a root.
fn completion_report(tx: &Transaction) -> Option<Action> {
    let superior = tx.superior()?.clone();
    let outcome = tx.decision()?.outcome();
    Some(Action::publish(Event::LocallyCompleted {
        xid: tx.xid().clone(),
        superior,
        outcome,
    }))
}

impl StateMachine for TwoPhaseCoordinator {
    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::BeginTransaction {
                xid,
                superior,
                timeout,
            } => self.on_begin(xid, superior, timeout),
            Event::RegisterBranch {
                xid,
                branch,
                participant,
            } => self.on_register_branch(xid, branch, participant),
            Event::SubmitCommit { xid } => self.on_submit_commit(xid),
            Event::SubmitRollback { xid } => self.on_submit_rollback(xid),
            Event::OperatorRetry { xid } => self.on_operator_retry(xid),

            Event::BranchPrepared { xid, branch, vote } => {
                self.on_branch_prepared(xid, branch, vote)
            }
            Event::PrepareBranchFailed { xid, branch, cause } => {
                self.on_prepare_failed(xid, branch, cause)
            }
            Event::BranchCommitted { xid, branch } => self.on_branch_committed(xid, branch),
            Event::CommitBranchFailed { xid, branch, cause } => {
                self.on_commit_failed(xid, branch, cause)
            }
            Event::BranchRolledBack { xid, branch } => self.on_branch_rolled_back(xid, branch),
            Event::RollbackBranchFailed { xid, branch, cause } => {
                self.on_rollback_failed(xid, branch, cause)
            }

            Event::RemoteOrderToPrepare { xid, superior } => {
                self.on_remote_order_to_prepare(xid, superior)
            }
            Event::RemoteOrderToCommit { xid } => self.on_remote_order_to_commit(xid),
            Event::RemoteOrderToRollback { xid } => self.on_remote_order_to_rollback(xid),
            Event::SuperiorNotified { xid } => self.on_superior_notified(xid),

            Event::RetryDue { xid, target } => self.on_retry_due(xid, target),
            Event::TransactionTimedOut { xid } => self.on_timeout(xid),

            other => {
                debug!(kind = ?other.kind(), "Coordinator ignoring event");
                vec![]
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}
