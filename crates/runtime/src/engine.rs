//! The engine: bolts wired to a dispatcher, plus the client API.

use crate::bolt::spawn_bolt;
use crate::bolts::{BoltContext, MachineBolt, OutcomeBolt, ResourceBolt};
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use xachain_coordinator::{Registry, TwoPhaseCoordinator};
use xachain_core::{
    DecisionLog, Event, EventKind, Participant, RemoteLink, RemoteMessage, StateMachine,
};
use xachain_remote::RemoteHandler;
use xachain_types::{ServerId, Xid};
use xachain_watchdog::Watchdog;

/// Capacity of the outcome broadcast; slow subscribers lag past this.
const OUTCOME_CAPACITY: usize = 1024;

/// A running transaction manager.
///
/// Must be started inside a tokio runtime. Every client call publishes a
/// request on the dispatcher and returns once it is queued; results arrive
/// as outcome events on [`subscribe_outcomes`](Engine::subscribe_outcomes).
pub struct Engine {
    config: EngineConfig,
    dispatcher: Dispatcher,
    registry: Arc<Registry>,
    outcomes: broadcast::Sender<Event>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Validate `config` and spawn every bolt.
    pub fn start(
        config: EngineConfig,
        link: Arc<dyn RemoteLink>,
        decision_log: Arc<dyn DecisionLog>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let dispatcher = Dispatcher::new();
        let registry = Arc::new(Registry::new());
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);
        let (shutdown, _) = broadcast::channel(1);
        let ctx = BoltContext {
            dispatcher: dispatcher.clone(),
            link,
            decision_log,
            epoch: Instant::now(),
        };
        let capacity = config.inbox_capacity;
        let mut tasks = Vec::new();

        // Coordinator pool, keyed by transaction.
        let mut members = Vec::with_capacity(config.coordinator_workers);
        let mut kinds: &[EventKind] = &[];
        for i in 0..config.coordinator_workers {
            let machine = TwoPhaseCoordinator::new(registry.clone(), config.coordinator.clone());
            kinds = machine.subscriptions();
            let (tx, rx) = mpsc::channel(capacity);
            members.push(tx);
            let bolt = MachineBolt::new(format!("coordinator-{i}"), machine, ctx.clone());
            tasks.push(spawn_bolt(bolt, rx, shutdown.subscribe()));
        }
        dispatcher.subscribe_pool("coordinator", kinds, members);

        let remote = RemoteHandler::new(registry.clone(), config.remote.clone());
        tasks.push(spawn_machine("remote", remote, &dispatcher, &ctx, capacity, &shutdown));

        let watchdog = Watchdog::new(config.watchdog.clone());
        tasks.push(spawn_machine("watchdog", watchdog, &dispatcher, &ctx, capacity, &shutdown));

        // Resource I/O pool.
        let mut members = Vec::with_capacity(config.resource_workers);
        for i in 0..config.resource_workers {
            let (tx, rx) = mpsc::channel(capacity);
            members.push(tx);
            let bolt = ResourceBolt::new(format!("resource-{i}"), dispatcher.clone());
            tasks.push(spawn_bolt(bolt, rx, shutdown.subscribe()));
        }
        dispatcher.subscribe_pool("resource", EventKind::BRANCH_REQUESTS, members);

        let (tx, rx) = mpsc::channel(capacity);
        dispatcher.subscribe("outcomes", EventKind::OUTCOMES, tx);
        tasks.push(spawn_bolt(OutcomeBolt::new(outcomes.clone()), rx, shutdown.subscribe()));

        info!(
            server = %config.server(),
            coordinator_workers = config.coordinator_workers,
            resource_workers = config.resource_workers,
            bolts = tasks.len(),
            "Engine started"
        );

        Ok(Self {
            config,
            dispatcher,
            registry,
            outcomes,
            shutdown,
            tasks,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn server(&self) -> &ServerId {
        self.config.server()
    }

    /// Read access to live transactions, for inspection and tests.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Receive every outcome event published from now on.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<Event> {
        self.outcomes.subscribe()
    }

    /// Start a transaction. Give `superior` when a remote coordinator owns
    /// the decision.
    pub async fn begin(
        &self,
        xid: Xid,
        superior: Option<ServerId>,
        timeout: Option<Duration>,
    ) -> Result<(), EngineError> {
        self.submit(Event::BeginTransaction {
            xid,
            superior,
            timeout,
        })
        .await
    }

    pub async fn register_branch(
        &self,
        xid: Xid,
        branch: Xid,
        participant: Participant,
    ) -> Result<(), EngineError> {
        self.submit(Event::RegisterBranch {
            xid,
            branch,
            participant,
        })
        .await
    }

    pub async fn submit_commit(&self, xid: Xid) -> Result<(), EngineError> {
        self.submit(Event::SubmitCommit { xid }).await
    }

    pub async fn submit_rollback(&self, xid: Xid) -> Result<(), EngineError> {
        self.submit(Event::SubmitRollback { xid }).await
    }

    /// Re-drive a transaction stuck after a fatal anomaly.
    pub async fn operator_retry(&self, xid: Xid) -> Result<(), EngineError> {
        self.submit(Event::OperatorRetry { xid }).await
    }

    /// Hand a message received by the transport to the engine.
    pub async fn deliver_remote(
        &self,
        from: ServerId,
        message: RemoteMessage,
    ) -> Result<(), EngineError> {
        self.submit(Event::RemoteMessageReceived { from, message }).await
    }

    async fn submit(&self, event: Event) -> Result<(), EngineError> {
        self.dispatcher.publish(event).await?;
        Ok(())
    }

    /// Stop every bolt and wait for them to exit.
    ///
    /// Transactions still in the registry are abandoned; their decisions
    /// are in the decision log.
    pub async fn shutdown(self) {
        let live = self.registry.len();
        if live > 0 {
            warn!(transactions = live, "Shutting down with live transactions");
        }
        if self.shutdown.send(()).is_err() {
            warn!("No bolt listening for shutdown");
        }
        self.dispatcher.close();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Bolt task failed");
            }
        }
        info!("Engine stopped");
    }
}

fn spawn_machine<S: StateMachine + Send + 'static>(
    name: &str,
    machine: S,
    dispatcher: &Dispatcher,
    ctx: &BoltContext,
    capacity: usize,
    shutdown: &broadcast::Sender<()>,
) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel(capacity);
    dispatcher.subscribe(name, machine.subscriptions(), tx);
    let bolt = MachineBolt::new(name, machine, ctx.clone());
    spawn_bolt(bolt, rx, shutdown.subscribe())
}
