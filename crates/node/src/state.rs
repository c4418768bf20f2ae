//! The node state machine.

use crate::config::NodeConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use xachain_coordinator::{Registry, TwoPhaseCoordinator};
use xachain_core::{Action, Event, EventKind, StateMachine};
use xachain_remote::RemoteHandler;
use xachain_types::ServerId;
use xachain_watchdog::Watchdog;

/// Index of a node in a simulation.
pub type NodeIndex = u32;

/// Union of the component subscriptions.
const SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::BeginTransaction,
    EventKind::RegisterBranch,
    EventKind::SubmitCommit,
    EventKind::SubmitRollback,
    EventKind::OperatorRetry,
    EventKind::PrepareBranchRequested,
    EventKind::CommitBranchRequested,
    EventKind::RollbackBranchRequested,
    EventKind::BranchPrepared,
    EventKind::PrepareBranchFailed,
    EventKind::BranchCommitted,
    EventKind::CommitBranchFailed,
    EventKind::BranchRolledBack,
    EventKind::RollbackBranchFailed,
    EventKind::RemoteMessageReceived,
    EventKind::RemoteDelivered,
    EventKind::RemoteDeliveryFailed,
    EventKind::RemoteOrderToPrepare,
    EventKind::RemoteOrderToCommit,
    EventKind::RemoteOrderToRollback,
    EventKind::LocallyPrepared,
    EventKind::LocallyCompleted,
    EventKind::SuperiorNotified,
    EventKind::RemoteRetryRequested,
    EventKind::TransactionBegun,
    EventKind::TransactionFinished,
    EventKind::RetryRequested,
    EventKind::RetryDue,
    EventKind::TimerFired,
    EventKind::TransactionTimedOut,
];

/// A complete transaction manager: coordinator, remote handler and watchdog
/// over one registry.
///
/// Each event goes to every component subscribed to its kind, in a fixed
/// order (coordinator, remote handler, watchdog), and their actions are
/// concatenated. Single-threaded; the simulation runs one per node.
pub struct NodeStateMachine {
    server: ServerId,
    registry: Arc<Registry>,
    coordinator: TwoPhaseCoordinator,
    remote: RemoteHandler,
    watchdog: Watchdog,
    now: Duration,
}

impl NodeStateMachine {
    pub fn new(config: NodeConfig) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            server: config.server().clone(),
            coordinator: TwoPhaseCoordinator::new(registry.clone(), config.coordinator),
            remote: RemoteHandler::new(registry.clone(), config.remote),
            watchdog: Watchdog::new(config.watchdog),
            registry,
            now: Duration::ZERO,
        }
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }
}

fn route<S: StateMachine>(machine: &mut S, event: &Event, actions: &mut Vec<Action>) {
    if machine.subscriptions().contains(&event.kind()) {
        actions.extend(machine.handle(event.clone()));
    }
}

impl StateMachine for NodeStateMachine {
    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn handle(&mut self, event: Event) -> Vec<Action> {
        trace!(server = %self.server, kind = ?event.kind(), "Node handling event");
        let mut actions = Vec::new();
        route(&mut self.coordinator, &event, &mut actions);
        route(&mut self.remote, &event, &mut actions);
        route(&mut self.watchdog, &event, &mut actions);
        actions
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.coordinator.set_time(now);
        self.remote.set_time(now);
        self.watchdog.set_time(now);
    }

    fn now(&self) -> Duration {
        self.now
    }
}
