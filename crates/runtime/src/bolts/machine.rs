//! Runs a sans-IO state machine and performs its actions.

use crate::bolt::Bolt;
use crate::dispatcher::Dispatcher;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, Instrument};
use xachain_core::{Action, DecisionLog, Event, LinkError, RemoteLink, StateMachine, TimerId};

/// Collaborators shared by every machine bolt of an engine.
#[derive(Clone)]
pub struct BoltContext {
    pub dispatcher: Dispatcher,
    pub link: Arc<dyn RemoteLink>,
    pub decision_log: Arc<dyn DecisionLog>,
    /// Zero point of the machines' clock.
    pub epoch: Instant,
}

/// Bolt hosting a [`StateMachine`].
///
/// Actions run in the order the machine returned them, so a decision is
/// written to the log before the requests that act on it are published.
/// Timers are tokio tasks owned by this bolt.
pub struct MachineBolt<S> {
    name: String,
    machine: S,
    ctx: BoltContext,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl<S: StateMachine> MachineBolt<S> {
    pub fn new(name: impl Into<String>, machine: S, ctx: BoltContext) -> Self {
        Self {
            name: name.into(),
            machine,
            ctx,
            timers: HashMap::new(),
        }
    }

    /// Number of timers armed and not yet fired.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::Publish { event } => publish(&self.ctx.dispatcher, &self.name, event).await,

            Action::SetTimer { id, duration } => {
                if let Some(previous) = self.timers.remove(&id) {
                    previous.abort();
                }
                let dispatcher = self.ctx.dispatcher.clone();
                let fired = id.clone();
                let handle = tokio::spawn(
                    async move {
                        tokio::time::sleep(duration).await;
                        if dispatcher.publish(Event::TimerFired { id: fired }).await.is_err() {
                            trace!("Timer fired after shutdown");
                        }
                    }
                    .in_current_span(),
                );
                self.timers.insert(id, handle);
            }

            Action::CancelTimer { id } => {
                if let Some(handle) = self.timers.remove(&id) {
                    handle.abort();
                }
            }

            Action::SendRemote { to, message } => {
                // Awaited in place so sends on one link keep their order.
                let link = Arc::clone(&self.ctx.link);
                let (target, sent) = (to.clone(), message.clone());
                let result = tokio::task::spawn_blocking(move || link.send(&target, &sent))
                    .await
                    .unwrap_or_else(|e| Err(LinkError::Transport(format!("link panicked: {e}"))));
                let event = match result {
                    Ok(()) => Event::RemoteDelivered { to, message },
                    Err(e) => {
                        debug!(bolt = %self.name, to = %to, message = message.type_name(), error = %e, "Remote send failed");
                        Event::RemoteDeliveryFailed {
                            to,
                            message,
                            cause: e.to_string(),
                        }
                    }
                };
                publish(&self.ctx.dispatcher, &self.name, event).await;
            }

            Action::RecordDecision { xid, decision } => {
                // Not fatal; only crash recovery loses the record.
                if let Err(e) = self.ctx.decision_log.record(&xid, decision) {
                    error!(xid = %xid, ?decision, error = %e, "Failed to record decision");
                }
            }
        }
    }
}

async fn publish(dispatcher: &Dispatcher, bolt: &str, event: Event) {
    if dispatcher.publish(event).await.is_err() {
        trace!(bolt, "Dropping event after shutdown");
    }
}

#[async_trait]
impl<S: StateMachine + Send + 'static> Bolt for MachineBolt<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&mut self, event: Event) {
        if let Event::TimerFired { id } = &event {
            self.timers.remove(id);
        }
        self.machine.set_time(self.ctx.epoch.elapsed());
        let actions = self.machine.handle(event);
        for action in actions {
            self.execute(action).await;
        }
    }
}

impl<S> Drop for MachineBolt<S> {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}
