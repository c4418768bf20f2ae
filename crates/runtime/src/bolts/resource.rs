//! Blocking resource calls.

use crate::bolt::Bolt;
use crate::dispatcher::Dispatcher;
use async_trait::async_trait;
use tracing::{error, trace, Instrument};
use xachain_core::{Event, Participant, ResourceAdapter};

/// Member of the resource I/O pool.
///
/// Each branch request becomes its own task on tokio's blocking thread pool
/// and the bolt moves on at once, so a slow resource delays only the branch
/// waiting on it. Calls on one handle still serialize on the handle's lock.
pub struct ResourceBolt {
    name: String,
    dispatcher: Dispatcher,
}

impl ResourceBolt {
    pub fn new(name: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Self {
            name: name.into(),
            dispatcher,
        }
    }
}

#[async_trait]
impl Bolt for ResourceBolt {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&mut self, event: Event) {
        if !is_local_request(&event) {
            return;
        }
        let name = self.name.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(
            async move {
                let request = event.clone();
                let reply = match tokio::task::spawn_blocking(move || ResourceAdapter::execute(&event)).await {
                    Ok(Some(reply)) => reply,
                    Ok(None) => return,
                    Err(e) => {
                        error!(bolt = %name, kind = ?request.kind(), xid = ?request.xid(), error = %e, "Resource call panicked");
                        match failure_reply(&request, format!("resource panicked: {e}")) {
                            Some(reply) => reply,
                            None => return,
                        }
                    }
                };
                if dispatcher.publish(reply).await.is_err() {
                    trace!(bolt = %name, "Dropping reply after shutdown");
                }
            }
            .in_current_span(),
        );
    }
}

/// Branch requests this pool answers; remote branches go to the remote handler.
fn is_local_request(event: &Event) -> bool {
    matches!(
        event,
        Event::PrepareBranchRequested {
            participant: Participant::Local(_),
            ..
        } | Event::CommitBranchRequested {
            participant: Participant::Local(_),
            ..
        } | Event::RollbackBranchRequested {
            participant: Participant::Local(_),
            ..
        }
    )
}

/// Failure reply for a branch request whose resource call did not return.
fn failure_reply(request: &Event, cause: String) -> Option<Event> {
    let reply = match request {
        Event::PrepareBranchRequested { xid, branch, .. } => Event::PrepareBranchFailed {
            xid: xid.clone(),
            branch: branch.clone(),
            cause,
        },
        Event::CommitBranchRequested { xid, branch, .. } => Event::CommitBranchFailed {
            xid: xid.clone(),
            branch: branch.clone(),
            cause,
        },
        Event::RollbackBranchRequested { xid, branch, .. } => Event::RollbackBranchFailed {
            xid: xid.clone(),
            branch: branch.clone(),
            cause,
        },
        _ => return None,
    };
    Some(reply)
}
