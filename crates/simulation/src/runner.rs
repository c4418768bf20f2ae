//! Deterministic simulation runner.

use crate::event_queue::{EventKey, EventPriority};
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::NodeIndex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use xachain_core::{
    Action, DecisionLog, Event, MemoryDecisionLog, RemoteMessage, ResourceAdapter, StateMachine,
    TimerId,
};
use xachain_node::{NodeConfig, NodeStateMachine};
use xachain_types::{Decision, ServerId, Xid};

/// Statistics collected during a simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Total actions generated.
    pub actions_generated: u64,
    /// Resource calls executed.
    pub resource_calls: u64,
    /// Remote messages handed to the network.
    pub messages_sent: u64,
    /// Remote messages lost in transit.
    pub messages_dropped: u64,
    /// Remote sends refused because of a partition or unknown target.
    pub messages_refused: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Timers cancelled.
    pub timers_cancelled: u64,
    /// Outcome events published to clients.
    pub outcomes: u64,
}

/// An outcome event observed by a client of some node.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    pub node: NodeIndex,
    pub time: Duration,
    pub event: Event,
}

/// Deterministic simulation runner.
///
/// Processes events in deterministic order using a BTreeMap as a priority
/// queue. Given the same seed, produces identical results every run.
///
/// Resource calls run inline: a branch request published by a node is
/// answered by the reply event at the same instant. Remote messages cross the
/// [`SimulatedNetwork`]; a send to a partitioned or unknown server fails
/// immediately, which is how a real link reports an unreachable peer.
pub struct SimulationRunner {
    /// Event queue ordered deterministically.
    queue: BTreeMap<EventKey, Event>,

    /// Sequence counter for deterministic ordering.
    sequence: u64,

    /// Current simulation time.
    now: Duration,

    nodes: Vec<NodeStateMachine>,

    /// Server id → node index.
    servers: HashMap<ServerId, NodeIndex>,

    /// Per-node decision logs.
    decision_logs: Vec<MemoryDecisionLog>,

    network: SimulatedNetwork,

    /// Seeded RNG for latency and loss.
    rng: ChaCha8Rng,

    /// Pending timers, so they can be replaced or cancelled.
    timers: HashMap<(NodeIndex, TimerId), EventKey>,

    /// Outcome events, in publication order.
    outcomes: Vec<OutcomeRecord>,

    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create a runner with one node per configuration.
    pub fn new(configs: Vec<NodeConfig>, network: NetworkConfig, seed: u64) -> Self {
        let mut servers = HashMap::new();
        let mut nodes = Vec::with_capacity(configs.len());
        for (index, config) in configs.into_iter().enumerate() {
            let index = index as NodeIndex;
            if servers.insert(config.server().clone(), index).is_some() {
                warn!(server = %config.server(), "Duplicate server id; later node shadows earlier");
            }
            nodes.push(NodeStateMachine::new(config));
        }
        let decision_logs = nodes.iter().map(|_| MemoryDecisionLog::new()).collect();

        info!(nodes = nodes.len(), seed, "Created simulation runner");

        Self {
            queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            nodes,
            servers,
            decision_logs,
            network: SimulatedNetwork::new(network),
            rng: ChaCha8Rng::seed_from_u64(seed),
            timers: HashMap::new(),
            outcomes: Vec::new(),
            stats: SimulationStats::default(),
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn node(&self, index: NodeIndex) -> Option<&NodeStateMachine> {
        self.nodes.get(index as usize)
    }

    pub fn node_index(&self, server: &ServerId) -> Option<NodeIndex> {
        self.servers.get(server).copied()
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// Decisions recorded by a node, in order.
    pub fn decisions(&self, node: NodeIndex) -> Vec<(Xid, Decision)> {
        self.decision_logs
            .get(node as usize)
            .map(|log| log.records())
            .unwrap_or_default()
    }

    /// Every outcome event published so far.
    pub fn outcomes(&self) -> &[OutcomeRecord] {
        &self.outcomes
    }

    /// Outcome events for one transaction.
    pub fn outcomes_for(&self, xid: &Xid) -> Vec<&OutcomeRecord> {
        self.outcomes
            .iter()
            .filter(|record| record.event.xid() == Some(xid))
            .collect()
    }

    /// Whether any event is waiting.
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Submit a client request to a node at the current time.
    pub fn submit(&mut self, node: NodeIndex, event: Event) {
        self.schedule(node, self.now, EventPriority::Client, event);
    }

    fn schedule(&mut self, node: NodeIndex, time: Duration, priority: EventPriority, event: Event) -> EventKey {
        self.sequence += 1;
        let key = EventKey {
            time,
            priority,
            node,
            sequence: self.sequence,
        };
        trace!(node, ?time, kind = ?event.kind(), "Scheduled event");
        self.queue.insert(key, event);
        key
    }

    /// Process the next event. Returns false when the queue is empty.
    pub fn step(&mut self) -> bool {
        let Some((key, event)) = self.queue.pop_first() else {
            return false;
        };
        self.now = key.time;
        if let Event::TimerFired { id } = &event {
            self.timers.remove(&(key.node, id.clone()));
        }
        self.process(key.node, event);
        true
    }

    /// Process events until the queue is empty or the next event is after
    /// `until`. The clock ends at `until`.
    pub fn run_until(&mut self, until: Duration) {
        while let Some((key, _)) = self.queue.first_key_value() {
            if key.time > until {
                break;
            }
            self.step();
        }
        self.now = self.now.max(until);
    }

    /// Advance the clock by `duration`, processing everything due.
    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(self.now + duration);
    }

    fn process(&mut self, node: NodeIndex, event: Event) {
        let Some(machine) = self.nodes.get_mut(node as usize) else {
            warn!(node, kind = ?event.kind(), "Event for unknown node dropped");
            return;
        };
        self.stats.events_processed += 1;
        machine.set_time(self.now);
        let actions = machine.handle(event);
        self.stats.actions_generated += actions.len() as u64;

        for action in actions {
            self.execute(node, action);
        }
    }

    fn execute(&mut self, node: NodeIndex, action: Action) {
        match action {
            Action::Publish { event } => self.publish(node, event),

            Action::SetTimer { id, duration } => {
                if let Some(previous) = self.timers.remove(&(node, id.clone())) {
                    self.queue.remove(&previous);
                }
                let key = self.schedule(
                    node,
                    self.now + duration,
                    EventPriority::Timer,
                    Event::TimerFired { id: id.clone() },
                );
                self.timers.insert((node, id), key);
                self.stats.timers_set += 1;
            }

            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&(node, id)) {
                    self.queue.remove(&key);
                    self.stats.timers_cancelled += 1;
                }
            }

            Action::SendRemote { to, message } => self.send_remote(node, to, message),

            Action::RecordDecision { xid, decision } => {
                if let Some(log) = self.decision_logs.get(node as usize) {
                    if let Err(e) = log.record(&xid, decision) {
                        warn!(node, xid = %xid, error = %e, "Decision log write failed");
                    }
                }
            }
        }
    }

    fn publish(&mut self, node: NodeIndex, event: Event) {
        if event.is_outcome() {
            debug!(node, kind = ?event.kind(), xid = ?event.xid(), "Outcome");
            self.stats.outcomes += 1;
            self.outcomes.push(OutcomeRecord {
                node,
                time: self.now,
                event,
            });
            return;
        }
        match ResourceAdapter::execute(&event) {
            Some(reply) => {
                self.stats.resource_calls += 1;
                self.schedule(node, self.now, EventPriority::Internal, reply);
            }
            None => {
                self.schedule(node, self.now, EventPriority::Internal, event);
            }
        }
    }

    fn send_remote(&mut self, node: NodeIndex, to: ServerId, message: RemoteMessage) {
        let Some(from) = self.nodes.get(node as usize).map(|n| n.server().clone()) else {
            return;
        };
        let target = self.node_index(&to);
        let refused = match target {
            None => Some(format!("unknown server {to}")),
            Some(_) if self.network.is_partitioned(&from, &to) => {
                Some(format!("{from} partitioned from {to}"))
            }
            Some(_) => None,
        };
        if let Some(cause) = refused {
            debug!(node, to = %to, message = message.type_name(), cause = %cause, "Send refused");
            self.stats.messages_refused += 1;
            self.schedule(
                node,
                self.now,
                EventPriority::Network,
                Event::RemoteDeliveryFailed { to, message, cause },
            );
            return;
        }

        self.stats.messages_sent += 1;
        let arrival = self.network.arrival_time(&from, &to, self.now, &mut self.rng);
        match (target, arrival) {
            (Some(target), Some(arrival)) => {
                self.schedule(
                    target,
                    arrival,
                    EventPriority::Network,
                    Event::RemoteMessageReceived {
                        from,
                        message: message.clone(),
                    },
                );
            }
            _ => {
                // Lost after the link accepted it; the sender cannot tell.
                debug!(node, to = %to, message = message.type_name(), "Message dropped");
                self.stats.messages_dropped += 1;
            }
        }
        self.schedule(
            node,
            self.now,
            EventPriority::Network,
            Event::RemoteDelivered { to, message },
        );
    }
}
