//! Remote protocol state machine.

use crate::config::RemoteConfig;
use crate::status::{current_report, pending_order};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use xachain_coordinator::Registry;
use xachain_core::{
    Action, Anomaly, AnomalyKind, Event, EventKind, Participant, RetryTarget, StateMachine,
};
use xachain_messages::{DoneStatusReport, RemoteMessage};
use xachain_types::{BranchState, Outcome, ServerId, Vote, Xid};

const SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::PrepareBranchRequested,
    EventKind::CommitBranchRequested,
    EventKind::RollbackBranchRequested,
    EventKind::LocallyPrepared,
    EventKind::LocallyCompleted,
    EventKind::RemoteRetryRequested,
    EventKind::RemoteMessageReceived,
    EventKind::RemoteDelivered,
    EventKind::RemoteDeliveryFailed,
    EventKind::RetryDue,
];

/// Translates between coordinator events and remote link messages.
///
/// Reads the shared registry to route replies and recompute retries, never
/// mutates it; every state change goes back through the coordinator as an
/// event.
pub struct RemoteHandler {
    registry: Arc<Registry>,
    config: RemoteConfig,
    now: Duration,
}

impl RemoteHandler {
    pub fn new(registry: Arc<Registry>, config: RemoteConfig) -> Self {
        Self {
            registry,
            config,
            now: Duration::ZERO,
        }
    }

    pub fn local_server(&self) -> &ServerId {
        &self.config.local_server
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Outbound
    // ═══════════════════════════════════════════════════════════════════════

    fn on_branch_request(&self, branch: Xid, participant: Participant, message: RemoteMessage) -> Vec<Action> {
        let Participant::Remote(server) = participant else {
            return vec![];
        };
        debug!(branch = %branch, to = %server, message = message.type_name(), "Sending order");
        vec![Action::SendRemote {
            to: server,
            message,
        }]
    }

    fn on_locally_prepared(&self, xid: Xid, superior: ServerId) -> Vec<Action> {
        debug!(xid = %xid, superior = %superior, "Reporting ready");
        vec![Action::SendRemote {
            to: superior,
            message: RemoteMessage::ready(xid),
        }]
    }

    fn on_locally_completed(&self, xid: Xid, superior: ServerId, outcome: Outcome) -> Vec<Action> {
        debug!(xid = %xid, superior = %superior, %outcome, "Reporting done");
        vec![Action::SendRemote {
            to: superior,
            message: RemoteMessage::done(xid, outcome),
        }]
    }

    fn on_remote_retry_requested(&self, xid: Xid, subordinate: ServerId) -> Vec<Action> {
        debug!(xid = %xid, subordinate = %subordinate, "Requesting status");
        vec![Action::SendRemote {
            to: subordinate,
            message: RemoteMessage::retry_request(self.config.local_server.clone()),
        }]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Delivery results
    // ═══════════════════════════════════════════════════════════════════════

    fn on_delivered(&self, to: ServerId, message: RemoteMessage) -> Vec<Action> {
        // The superior has the done report; the subordinate can forget.
        if let RemoteMessage::Done(DoneStatusReport { xid, .. }) = message {
            if self.registry.contains(&xid) {
                debug!(xid = %xid, superior = %to, "Done report delivered");
                return vec![Action::publish(Event::SuperiorNotified { xid })];
            }
        }
        vec![]
    }

    fn on_delivery_failed(&self, to: ServerId, message: RemoteMessage, cause: String) -> Vec<Action> {
        let Some(xid) = message.xid().cloned() else {
            // Retry requests are re-sent by the next deadline expiry.
            debug!(to = %to, cause = %cause, "Retry request not delivered");
            return vec![];
        };

        if message.is_status_report() {
            if !self.registry.contains(&xid) {
                return vec![];
            }
            warn!(xid = %xid, superior = %to, cause = %cause, "Status report not delivered");
            return vec![Action::publish(Event::RetryRequested {
                xid,
                target: RetryTarget::Report,
                cause,
            })];
        }

        match self.registry.owner_of(&xid) {
            Some(owner) => {
                warn!(xid = %owner, branch = %xid, subordinate = %to, cause = %cause, "Order not delivered");
                vec![Action::publish(Event::RetryRequested {
                    xid: owner,
                    target: RetryTarget::Order(xid),
                    cause,
                })]
            }
            // Answers to forgotten transactions are not retried.
            None => vec![],
        }
    }

    fn on_retry_due(&self, xid: Xid, target: RetryTarget) -> Vec<Action> {
        let resend = match target {
            RetryTarget::Report => self
                .registry
                .with_transaction(&xid, |tx| current_report(tx))
                .ok()
                .flatten(),
            RetryTarget::Order(branch) => self
                .registry
                .with_transaction(&xid, |tx| tx.branch(&branch).and_then(pending_order))
                .ok()
                .flatten(),
            // Branch retries belong to the coordinator.
            RetryTarget::Commit(_) | RetryTarget::Rollback(_) => return vec![],
        };
        match resend {
            Some((to, message)) => {
                debug!(xid = %xid, to = %to, message = message.type_name(), "Re-sending");
                vec![Action::SendRemote { to, message }]
            }
            None => {
                debug!(xid = %xid, "Nothing left to re-send");
                vec![]
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inbound
    // ═══════════════════════════════════════════════════════════════════════

    fn on_message(&self, from: ServerId, message: RemoteMessage) -> Vec<Action> {
        match message {
            RemoteMessage::OrderToPrepare(order) => {
                vec![Action::publish(Event::RemoteOrderToPrepare {
                    xid: order.xid,
                    superior: from,
                })]
            }
            RemoteMessage::OrderToCommit(order) => {
                self.on_decision_order(from, order.xid, Outcome::Committed)
            }
            RemoteMessage::OrderToRollback(order) => {
                self.on_decision_order(from, order.xid, Outcome::RolledBack)
            }
            RemoteMessage::Ready(report) => self.on_ready(from, report.xid),
            RemoteMessage::Done(report) => self.on_done(from, report.xid, report.outcome),
            RemoteMessage::RetryRequest(request) => self.on_status_request(request.server),
        }
    }

    fn on_decision_order(&self, from: ServerId, xid: Xid, ordered: Outcome) -> Vec<Action> {
        if !self.registry.contains(&xid) {
            info!(xid = %xid, superior = %from, %ordered, "Order for a forgotten transaction, answering done");
            return vec![Action::SendRemote {
                to: from,
                message: RemoteMessage::done(xid, ordered),
            }];
        }
        let event = match ordered {
            Outcome::Committed => Event::RemoteOrderToCommit { xid },
            Outcome::RolledBack => Event::RemoteOrderToRollback { xid },
        };
        vec![Action::publish(event)]
    }

    fn on_ready(&self, from: ServerId, branch: Xid) -> Vec<Action> {
        let Some(owner) = self.registry.owner_of(&branch) else {
            // Presumed abort: a branch nobody owns was never committed here.
            info!(branch = %branch, subordinate = %from, "Ready from an unknown branch, ordering rollback");
            return vec![Action::SendRemote {
                to: from,
                message: RemoteMessage::order_to_rollback(branch),
            }];
        };
        let state = self
            .registry
            .with_transaction(&owner, |tx| tx.branch(&branch).map(|b| b.state))
            .ok()
            .flatten();

        match state {
            Some(BranchState::Preparing) => vec![Action::publish(Event::BranchPrepared {
                xid: owner,
                branch,
                vote: Vote::Commit,
            })],
            // The subordinate missed the order; send it again.
            Some(BranchState::Committing) | Some(BranchState::Committed) => {
                vec![Action::SendRemote {
                    to: from,
                    message: RemoteMessage::order_to_commit(branch),
                }]
            }
            Some(BranchState::RollingBack) | Some(BranchState::RolledBack) => {
                vec![Action::SendRemote {
                    to: from,
                    message: RemoteMessage::order_to_rollback(branch),
                }]
            }
            other => {
                debug!(xid = %owner, branch = %branch, state = ?other, "Ignoring ready report");
                vec![]
            }
        }
    }

    fn on_done(&self, from: ServerId, branch: Xid, reported: Outcome) -> Vec<Action> {
        let Some(owner) = self.registry.owner_of(&branch) else {
            debug!(branch = %branch, subordinate = %from, "Done report for an unknown branch");
            return vec![];
        };
        let state = self
            .registry
            .with_transaction(&owner, |tx| tx.branch(&branch).map(|b| b.state))
            .ok()
            .flatten();

        let event = match (state, reported) {
            (Some(BranchState::Registered | BranchState::Preparing), Outcome::RolledBack) => {
                Event::PrepareBranchFailed {
                    xid: owner,
                    branch,
                    cause: format!("subordinate {from} rolled back"),
                }
            }
            (Some(BranchState::Committing), Outcome::Committed) => Event::BranchCommitted {
                xid: owner,
                branch,
            },
            (Some(BranchState::RollingBack), Outcome::RolledBack) => Event::BranchRolledBack {
                xid: owner,
                branch,
            },
            (Some(BranchState::Committing), Outcome::RolledBack) => {
                mismatch(owner, branch, &from, Outcome::Committed, reported)
            }
            (Some(BranchState::RollingBack), Outcome::Committed) => {
                mismatch(owner, branch, &from, Outcome::RolledBack, reported)
            }
            (state, _) => {
                debug!(xid = %owner, branch = %branch, state = ?state, %reported, "Ignoring done report");
                return vec![];
            }
        };
        vec![Action::publish(event)]
    }

    /// A superior asked for the status of everything it owns here.
    fn on_status_request(&self, superior: ServerId) -> Vec<Action> {
        let xids = self.registry.subordinates_of(&superior);
        debug!(superior = %superior, transactions = xids.len(), "Status requested");
        xids.iter()
            .filter_map(|xid| {
                self.registry
                    .with_transaction(xid, |tx| current_report(tx))
                    .ok()
                    .flatten()
            })
            .map(|(to, message)| Action::SendRemote { to, message })
            .collect()
    }
}

fn mismatch(owner: Xid, branch: Xid, from: &ServerId, expected: Outcome, reported: Outcome) -> Event {
    warn!(
        xid = %owner,
        branch = %branch,
        subordinate = %from,
        %expected,
        %reported,
        "Subordinate outcome contradicts the decision"
    );
    Event::FatalAnomaly {
        xid: owner,
        anomaly: Anomaly {
            kind: AnomalyKind::HeuristicMismatch { expected, reported },
            branch: Some(branch),
            attempts: 0,
            cause: format!("{from} reported {reported}"),
        },
    }
}

impl StateMachine for RemoteHandler {
    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::PrepareBranchRequested {
                branch, participant, ..
            } => {
                let message = RemoteMessage::order_to_prepare(branch.clone());
                self.on_branch_request(branch, participant, message)
            }
            Event::CommitBranchRequested {
                branch, participant, ..
            } => {
                let message = RemoteMessage::order_to_commit(branch.clone());
                self.on_branch_request(branch, participant, message)
            }
            Event::RollbackBranchRequested {
                branch, participant, ..
            } => {
                let message = RemoteMessage::order_to_rollback(branch.clone());
                self.on_branch_request(branch, participant, message)
            }
            Event::LocallyPrepared { xid, superior } => self.on_locally_prepared(xid, superior),
            Event::LocallyCompleted {
                xid,
                superior,
                outcome,
            } => self.on_locally_completed(xid, superior, outcome),
            Event::RemoteRetryRequested { xid, subordinate } => {
                self.on_remote_retry_requested(xid, subordinate)
            }
            Event::RemoteMessageReceived { from, message } => self.on_message(from, message),
            Event::RemoteDelivered { to, message } => self.on_delivered(to, message),
            Event::RemoteDeliveryFailed { to, message, cause } => {
                self.on_delivery_failed(to, message, cause)
            }
            Event::RetryDue { xid, target } => self.on_retry_due(xid, target),
            other => {
                debug!(kind = ?other.kind(), "Remote handler ignoring event");
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

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use xachain_coordinator::{CoordinatorConfig, TwoPhaseCoordinator};
    use xachain_test_helpers::{test_branch, test_xid, ScriptedResource};

    struct Fixture {
        registry: Arc<Registry>,
        coordinator: TwoPhaseCoordinator,
        handler: RemoteHandler,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(Registry::new());
        Fixture {
            coordinator: TwoPhaseCoordinator::new(registry.clone(), CoordinatorConfig::default()),
            handler: RemoteHandler::new(registry.clone(), RemoteConfig::new(ServerId::new("tm-a"))),
            registry,
        }
    }

    fn sends(actions: &[Action]) -> Vec<(ServerId, RemoteMessage)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::SendRemote { to, message } => Some((to.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    fn published(actions: &[Action]) -> Vec<Event> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Publish { event } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Superior transaction with one remote branch on `tm-b`, prepare sent.
    fn superior_preparing(f: &mut Fixture) -> (Xid, Xid, ServerId) {
        let xid = test_xid(1);
        let branch = test_branch(&xid, 1);
        let sub = ServerId::new("tm-b");
        f.coordinator.handle(Event::BeginTransaction {
            xid: xid.clone(),
            superior: None,
            timeout: None,
        });
        f.coordinator.handle(Event::RegisterBranch {
            xid: xid.clone(),
            branch: branch.clone(),
            participant: Participant::Remote(sub.clone()),
        });
        let actions = f.coordinator.handle(Event::SubmitCommit { xid: xid.clone() });
        for event in published(&actions) {
            f.handler.handle(event);
        }
        (xid, branch, sub)
    }

    /// Subordinate transaction reporting to `tm-root`, prepared.
    fn subordinate_prepared(f: &mut Fixture) -> (Xid, ServerId) {
        let xid = test_branch(&test_xid(2), 1);
        let root = ServerId::new("tm-root");
        f.coordinator.handle(Event::RemoteOrderToPrepare {
            xid: xid.clone(),
            superior: root.clone(),
        });
        (xid, root)
    }

    #[traced_test]
    #[test]
    fn test_remote_branch_requests_become_orders() {
        let mut f = fixture();
        let xid = test_xid(1);
        let branch = test_branch(&xid, 1);
        let sub = ServerId::new("tm-b");

        let actions = f.handler.handle(Event::CommitBranchRequested {
            xid: xid.clone(),
            branch: branch.clone(),
            participant: Participant::Remote(sub.clone()),
            one_phase: false,
        });
        assert_eq!(
            sends(&actions),
            vec![(sub, RemoteMessage::order_to_commit(branch.clone()))]
        );

        // Local participants are the resource adapter's business.
        let (local, _) = ScriptedResource::new("db").into_participant();
        let actions = f.handler.handle(Event::PrepareBranchRequested {
            xid,
            branch,
            participant: local,
        });
        assert!(actions.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_ready_report_becomes_prepared_vote() {
        let mut f = fixture();
        let (xid, branch, sub) = superior_preparing(&mut f);

        let actions = f.handler.handle(Event::RemoteMessageReceived {
            from: sub,
            message: RemoteMessage::ready(branch.clone()),
        });
        assert_eq!(
            published(&actions),
            vec![Event::BranchPrepared {
                xid,
                branch,
                vote: Vote::Commit
            }]
        );
    }

    #[traced_test]
    #[test]
    fn test_ready_while_committing_resends_order() {
        let mut f = fixture();
        let (xid, branch, sub) = superior_preparing(&mut f);
        f.coordinator.handle(Event::BranchPrepared {
            xid,
            branch: branch.clone(),
            vote: Vote::Commit,
        });

        let actions = f.handler.handle(Event::RemoteMessageReceived {
            from: sub.clone(),
            message: RemoteMessage::ready(branch.clone()),
        });
        assert_eq!(
            sends(&actions),
            vec![(sub, RemoteMessage::order_to_commit(branch))]
        );
    }

    #[traced_test]
    #[test]
    fn test_done_reports_map_to_branch_replies() {
        let mut f = fixture();
        let (xid, branch, sub) = superior_preparing(&mut f);

        // Rolled back while we were still preparing: a failed vote.
        let actions = f.handler.handle(Event::RemoteMessageReceived {
            from: sub.clone(),
            message: RemoteMessage::done(branch.clone(), Outcome::RolledBack),
        });
        assert!(matches!(
            published(&actions).as_slice(),
            [Event::PrepareBranchFailed { xid: x, branch: b, .. }] if *x == xid && *b == branch
        ));

        f.coordinator.handle(Event::BranchPrepared {
            xid: xid.clone(),
            branch: branch.clone(),
            vote: Vote::Commit,
        });
        let actions = f.handler.handle(Event::RemoteMessageReceived {
            from: sub,
            message: RemoteMessage::done(branch.clone(), Outcome::Committed),
        });
        assert_eq!(
            published(&actions),
            vec![Event::BranchCommitted { xid, branch }]
        );
    }

    #[traced_test]
    #[test]
    fn test_contradicting_done_report_is_fatal() {
        let mut f = fixture();
        let (xid, branch, sub) = superior_preparing(&mut f);
        f.coordinator.handle(Event::BranchPrepared {
            xid: xid.clone(),
            branch: branch.clone(),
            vote: Vote::Commit,
        });

        let actions = f.handler.handle(Event::RemoteMessageReceived {
            from: sub,
            message: RemoteMessage::done(branch.clone(), Outcome::RolledBack),
        });
        match published(&actions).as_slice() {
            [Event::FatalAnomaly { xid: x, anomaly }] => {
                assert_eq!(*x, xid);
                assert_eq!(
                    anomaly.kind,
                    AnomalyKind::HeuristicMismatch {
                        expected: Outcome::Committed,
                        reported: Outcome::RolledBack
                    }
                );
                assert_eq!(anomaly.branch, Some(branch));
            }
            other => panic!("expected a fatal anomaly, got {other:?}"),
        }
    }

    #[traced_test]
    #[test]
    fn test_order_delivery_failure_requests_retry_and_resends() {
        let mut f = fixture();
        let (xid, branch, sub) = superior_preparing(&mut f);

        let actions = f.handler.handle(Event::RemoteDeliveryFailed {
            to: sub.clone(),
            message: RemoteMessage::order_to_prepare(branch.clone()),
            cause: "connection refused".into(),
        });
        assert_eq!(
            published(&actions),
            vec![Event::RetryRequested {
                xid: xid.clone(),
                target: RetryTarget::Order(branch.clone()),
                cause: "connection refused".into(),
            }]
        );

        let actions = f.handler.handle(Event::RetryDue {
            xid,
            target: RetryTarget::Order(branch.clone()),
        });
        assert_eq!(
            sends(&actions),
            vec![(sub, RemoteMessage::order_to_prepare(branch))]
        );
    }

    #[traced_test]
    #[test]
    fn test_report_retry_recomputes_status() {
        let mut f = fixture();
        let (xid, root) = subordinate_prepared(&mut f);

        let actions = f.handler.handle(Event::RemoteDeliveryFailed {
            to: root.clone(),
            message: RemoteMessage::ready(xid.clone()),
            cause: "partitioned".into(),
        });
        assert_eq!(
            published(&actions),
            vec![Event::RetryRequested {
                xid: xid.clone(),
                target: RetryTarget::Report,
                cause: "partitioned".into(),
            }]
        );

        // The superior's commit order arrived in the meantime.
        f.coordinator.handle(Event::RemoteOrderToCommit { xid: xid.clone() });
        let actions = f.handler.handle(Event::RetryDue {
            xid: xid.clone(),
            target: RetryTarget::Report,
        });
        assert_eq!(
            sends(&actions),
            vec![(root, RemoteMessage::done(xid, Outcome::Committed))]
        );
    }

    #[traced_test]
    #[test]
    fn test_delivered_done_report_notifies_coordinator() {
        let mut f = fixture();
        let (xid, root) = subordinate_prepared(&mut f);
        f.coordinator.handle(Event::RemoteOrderToRollback { xid: xid.clone() });

        let actions = f.handler.handle(Event::RemoteDelivered {
            to: root,
            message: RemoteMessage::done(xid.clone(), Outcome::RolledBack),
        });
        assert_eq!(
            published(&actions),
            vec![Event::SuperiorNotified { xid: xid.clone() }]
        );

        f.coordinator.handle(Event::SuperiorNotified { xid: xid.clone() });
        assert!(!f.registry.contains(&xid));
    }

    #[traced_test]
    #[test]
    fn test_orders_for_forgotten_transactions_answered() {
        let mut f = fixture();
        let root = ServerId::new("tm-root");
        let xid = test_branch(&test_xid(3), 1);

        let actions = f.handler.handle(Event::RemoteMessageReceived {
            from: root.clone(),
            message: RemoteMessage::order_to_commit(xid.clone()),
        });
        assert_eq!(
            sends(&actions),
            vec![(root.clone(), RemoteMessage::done(xid.clone(), Outcome::Committed))]
        );

        let actions = f.handler.handle(Event::RemoteMessageReceived {
            from: root.clone(),
            message: RemoteMessage::order_to_prepare(xid.clone()),
        });
        assert_eq!(
            published(&actions),
            vec![Event::RemoteOrderToPrepare {
                xid,
                superior: root
            }]
        );
    }

    #[traced_test]
    #[test]
    fn test_retry_request_re_reports_every_subordinate() {
        let mut f = fixture();
        let (xid, root) = subordinate_prepared(&mut f);

        let actions = f.handler.handle(Event::RemoteMessageReceived {
            from: root.clone(),
            message: RemoteMessage::retry_request(root.clone()),
        });
        assert_eq!(sends(&actions), vec![(root, RemoteMessage::ready(xid))]);
    }

    #[traced_test]
    #[test]
    fn test_timeout_status_request_names_local_server() {
        let mut f = fixture();
        let actions = f.handler.handle(Event::RemoteRetryRequested {
            xid: test_xid(1),
            subordinate: ServerId::new("tm-b"),
        });
        assert_eq!(
            sends(&actions),
            vec![(
                ServerId::new("tm-b"),
                RemoteMessage::retry_request(ServerId::new("tm-a"))
            )]
        );
    }

    #[traced_test]
    #[test]
    fn test_ready_from_unknown_branch_presumes_abort() {
        let mut f = fixture();
        let branch = test_branch(&test_xid(7), 1);
        let sub = ServerId::new("tm-b");
        let actions = f.handler.handle(Event::RemoteMessageReceived {
            from: sub.clone(),
            message: RemoteMessage::ready(branch.clone()),
        });
        assert_eq!(
            sends(&actions),
            vec![(sub, RemoteMessage::order_to_rollback(branch))]
        );
    }
}
