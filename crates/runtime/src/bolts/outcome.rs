//! Fans outcome events out to clients.

use crate::bolt::Bolt;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use xachain_core::Event;

/// Forwards outcome events to every [`Engine::subscribe_outcomes`] receiver.
///
/// [`Engine::subscribe_outcomes`]: crate::Engine::subscribe_outcomes
pub struct OutcomeBolt {
    outcomes: broadcast::Sender<Event>,
}

impl OutcomeBolt {
    pub fn new(outcomes: broadcast::Sender<Event>) -> Self {
        Self { outcomes }
    }
}

#[async_trait]
impl Bolt for OutcomeBolt {
    fn name(&self) -> &str {
        "outcomes"
    }

    async fn process(&mut self, event: Event) {
        debug!(kind = ?event.kind(), xid = ?event.xid(), "Outcome");
        if self.outcomes.send(event).is_err() {
            trace!("No outcome subscribers");
        }
    }
}
