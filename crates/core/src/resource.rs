//! The resource capability contract and its adapter.
//!
//! A [`Resource`] is the external driver for one branch (a database
//! connection, a queue session). The coordinator never calls it directly: it
//! publishes branch requests, and the adapter running on the resource I/O
//! bolt turns each request into a synchronous call and a reply event.

use crate::Event;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use xachain_types::{ResourceId, ServerId, Vote, Xid};

/// Errors reported by a resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// Transient failure (connection lost, resource busy).
    #[error("resource unavailable: {0}")]
    Unavailable(String),

    /// The resource rolled the branch back on its own.
    #[error("branch rolled back by resource: {0}")]
    RolledBack(String),

    /// The resource does not know the branch or rejected the call.
    #[error("resource protocol error: {0}")]
    Protocol(String),
}

/// Operations every participating resource implements.
///
/// Calls are synchronous I/O. The engine guarantees at most one call in
/// flight per resource handle.
pub trait Resource: Send {
    /// Name for logs.
    fn name(&self) -> &str {
        "resource"
    }

    /// Prepare the branch and vote.
    fn prepare(&mut self, branch: &Xid) -> Result<Vote, ResourceError>;

    /// Commit the branch; `one_phase` skips a preceding prepare.
    fn commit(&mut self, branch: &Xid, one_phase: bool) -> Result<(), ResourceError>;

    fn rollback(&mut self, branch: &Xid) -> Result<(), ResourceError>;

    /// Branches the resource holds prepared, for external reconciliation.
    fn recover(&mut self) -> Result<Vec<Xid>, ResourceError> {
        Ok(Vec::new())
    }
}

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a resource, owned by exactly one branch at a time.
///
/// Cloning the handle does not clone the resource; every clone serializes on
/// the same lock so a handle never runs two protocol calls at once.
#[derive(Clone)]
pub struct ResourceHandle {
    id: ResourceId,
    name: Arc<str>,
    inner: Arc<Mutex<Box<dyn Resource>>>,
}

impl ResourceHandle {
    pub fn new<R: Resource + 'static>(resource: R) -> Self {
        let id = ResourceId(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed));
        let name = Arc::from(resource.name());
        Self {
            id,
            name,
            inner: Arc::new(Mutex::new(Box::new(resource))),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prepare(&self, branch: &Xid) -> Result<Vote, ResourceError> {
        self.inner.lock().prepare(branch)
    }

    pub fn commit(&self, branch: &Xid, one_phase: bool) -> Result<(), ResourceError> {
        self.inner.lock().commit(branch, one_phase)
    }

    pub fn rollback(&self, branch: &Xid) -> Result<(), ResourceError> {
        self.inner.lock().rollback(branch)
    }

    pub fn recover(&self) -> Result<Vec<Xid>, ResourceError> {
        self.inner.lock().recover()
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceHandle({}, {})", self.id.0, self.name)
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceHandle {}

/// Who performs a branch's work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Participant {
    /// A resource driven in this process.
    Local(ResourceHandle),
    /// A subordinate coordinator reached over the remote link.
    Remote(ServerId),
}

impl Participant {
    pub fn is_remote(&self) -> bool {
        matches!(self, Participant::Remote(_))
    }

    pub fn as_local(&self) -> Option<&ResourceHandle> {
        match self {
            Participant::Local(handle) => Some(handle),
            Participant::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&ServerId> {
        match self {
            Participant::Remote(server) => Some(server),
            Participant::Local(_) => None,
        }
    }
}

/// Executes branch requests against local resources.
///
/// Shared by the tokio resource bolt and the simulation runner so both issue
/// identical reply events.
pub struct ResourceAdapter;

impl ResourceAdapter {
    /// Perform the resource call a branch request asks for.
    ///
    /// Returns the reply event, or `None` for anything that is not a branch
    /// request on a local participant (remote branches belong to the remote
    /// protocol handler).
    pub fn execute(request: &Event) -> Option<Event> {
        match request {
            Event::PrepareBranchRequested {
                xid,
                branch,
                participant: Participant::Local(handle),
            } => {
                let reply = match handle.prepare(branch) {
                    Ok(vote) => {
                        debug!(xid = %xid, branch = %branch, ?vote, resource = handle.name(), "Branch prepared");
                        Event::BranchPrepared {
                            xid: xid.clone(),
                            branch: branch.clone(),
                            vote,
                        }
                    }
                    Err(e) => {
                        warn!(xid = %xid, branch = %branch, error = %e, resource = handle.name(), "Prepare failed");
                        Event::PrepareBranchFailed {
                            xid: xid.clone(),
                            branch: branch.clone(),
                            cause: e.to_string(),
                        }
                    }
                };
                Some(reply)
            }
            Event::CommitBranchRequested {
                xid,
                branch,
                participant: Participant::Local(handle),
                one_phase,
            } => {
                let reply = match handle.commit(branch, *one_phase) {
                    Ok(()) => {
                        debug!(xid = %xid, branch = %branch, one_phase, resource = handle.name(), "Branch committed");
                        Event::BranchCommitted {
                            xid: xid.clone(),
                            branch: branch.clone(),
                        }
                    }
                    Err(e) => {
                        warn!(xid = %xid, branch = %branch, error = %e, resource = handle.name(), "Commit failed");
                        Event::CommitBranchFailed {
                            xid: xid.clone(),
                            branch: branch.clone(),
                            cause: e.to_string(),
                        }
                    }
                };
                Some(reply)
            }
            Event::RollbackBranchRequested {
                xid,
                branch,
                participant: Participant::Local(handle),
            } => {
                let reply = match handle.rollback(branch) {
                    Ok(()) => {
                        debug!(xid = %xid, branch = %branch, resource = handle.name(), "Branch rolled back");
                        Event::BranchRolledBack {
                            xid: xid.clone(),
                            branch: branch.clone(),
                        }
                    }
                    Err(e) => {
                        warn!(xid = %xid, branch = %branch, error = %e, resource = handle.name(), "Rollback failed");
                        Event::RollbackBranchFailed {
                            xid: xid.clone(),
                            branch: branch.clone(),
                            cause: e.to_string(),
                        }
                    }
                };
                Some(reply)
            }
            _ => None,
        }
    }
}
