//! Test helpers for xachain.
//!
//! - [`ScriptedResource`]: a [`Resource`] whose votes and failures are set up
//!   front, recording every call in a shared [`CallLog`]
//! - [`RecordingLink`]: a [`RemoteLink`] that records sends and can be cut
//! - [`FailingDecisionLog`]: a [`DecisionLog`] whose writes always fail
//! - xid fixtures re-exported from `xachain_types::test_utils`

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use xachain_core::{
    DecisionLog, LinkError, LogError, Participant, RemoteLink, Resource, ResourceError,
    ResourceHandle,
};
use xachain_messages::RemoteMessage;
use xachain_types::{Decision, ServerId, Vote, Xid};

pub use xachain_types::test_utils::{test_branch, test_xid, TEST_FORMAT_ID};

/// One call made on a scripted resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Prepare { branch: Xid, ok: bool },
    Commit { branch: Xid, one_phase: bool, ok: bool },
    Rollback { branch: Xid, ok: bool },
}

/// Shared record of resource calls, in call order.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Whether a commit of `branch` succeeded.
    pub fn committed(&self, branch: &Xid) -> bool {
        self.0
            .lock()
            .iter()
            .any(|c| matches!(c, Call::Commit { branch: b, ok: true, .. } if b == branch))
    }

    /// Whether a rollback of `branch` succeeded.
    pub fn rolled_back(&self, branch: &Xid) -> bool {
        self.0
            .lock()
            .iter()
            .any(|c| matches!(c, Call::Rollback { branch: b, ok: true } if b == branch))
    }

    pub fn prepare_calls(&self, branch: &Xid) -> usize {
        self.count(|c| matches!(c, Call::Prepare { branch: b, .. } if b == branch))
    }

    pub fn commit_calls(&self, branch: &Xid) -> usize {
        self.count(|c| matches!(c, Call::Commit { branch: b, .. } if b == branch))
    }

    pub fn rollback_calls(&self, branch: &Xid) -> usize {
        self.count(|c| matches!(c, Call::Rollback { branch: b, .. } if b == branch))
    }

    fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().iter().filter(|c| f(c)).count()
    }
}

/// A resource that answers from a script.
///
/// By default it votes commit and every call succeeds.
#[derive(Debug, Clone)]
pub struct ScriptedResource {
    name: String,
    log: CallLog,
    vote: Result<Vote, String>,
    commit_failures: u32,
    rollback_failures: u32,
}

impl ScriptedResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log: CallLog::new(),
            vote: Ok(Vote::Commit),
            commit_failures: 0,
            rollback_failures: 0,
        }
    }

    pub fn voting(mut self, vote: Vote) -> Self {
        self.vote = Ok(vote);
        self
    }

    /// Every prepare fails with `cause`.
    pub fn failing_prepare(mut self, cause: impl Into<String>) -> Self {
        self.vote = Err(cause.into());
        self
    }

    /// The next `n` commits fail, then commits succeed.
    pub fn failing_commits(mut self, n: u32) -> Self {
        self.commit_failures = n;
        self
    }

    /// The next `n` rollbacks fail, then rollbacks succeed.
    pub fn failing_rollbacks(mut self, n: u32) -> Self {
        self.rollback_failures = n;
        self
    }

    /// Record into an existing log shared with other resources.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Wrap in a handle, returning the handle and the call log.
    pub fn into_handle(self) -> (ResourceHandle, CallLog) {
        let log = self.log.clone();
        (ResourceHandle::new(self), log)
    }

    pub fn into_participant(self) -> (Participant, CallLog) {
        let (handle, log) = self.into_handle();
        (Participant::Local(handle), log)
    }
}

impl Resource for ScriptedResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, branch: &Xid) -> Result<Vote, ResourceError> {
        let result = self.vote.clone().map_err(ResourceError::RolledBack);
        self.log.push(Call::Prepare {
            branch: branch.clone(),
            ok: result.is_ok(),
        });
        result
    }

    fn commit(&mut self, branch: &Xid, one_phase: bool) -> Result<(), ResourceError> {
        let failed = self.commit_failures > 0;
        if failed {
            self.commit_failures -= 1;
        }
        self.log.push(Call::Commit {
            branch: branch.clone(),
            one_phase,
            ok: !failed,
        });
        if failed {
            Err(ResourceError::Unavailable(format!("{} unavailable", self.name)))
        } else {
            Ok(())
        }
    }

    fn rollback(&mut self, branch: &Xid) -> Result<(), ResourceError> {
        let failed = self.rollback_failures > 0;
        if failed {
            self.rollback_failures -= 1;
        }
        self.log.push(Call::Rollback {
            branch: branch.clone(),
            ok: !failed,
        });
        if failed {
            Err(ResourceError::Unavailable(format!("{} unavailable", self.name)))
        } else {
            Ok(())
        }
    }
}

/// A remote link that records what it sends.
#[derive(Debug, Default)]
pub struct RecordingLink {
    sent: Mutex<Vec<(ServerId, RemoteMessage)>>,
    unreachable: Mutex<HashSet<ServerId>>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sends to `server` fail (or succeed again).
    pub fn set_reachable(&self, server: &ServerId, reachable: bool) {
        let mut unreachable = self.unreachable.lock();
        if reachable {
            unreachable.remove(server);
        } else {
            unreachable.insert(server.clone());
        }
    }

    /// Messages delivered so far.
    pub fn sent(&self) -> Vec<(ServerId, RemoteMessage)> {
        self.sent.lock().clone()
    }
}

impl RemoteLink for RecordingLink {
    fn send(&self, to: &ServerId, message: &RemoteMessage) -> Result<(), LinkError> {
        if self.unreachable.lock().contains(to) {
            return Err(LinkError::Unreachable(to.clone()));
        }
        self.sent.lock().push((to.clone(), message.clone()));
        Ok(())
    }
}

/// A decision log whose writes always fail.
#[derive(Debug, Default)]
pub struct FailingDecisionLog;

impl DecisionLog for FailingDecisionLog {
    fn record(&self, _xid: &Xid, _decision: Decision) -> Result<(), LogError> {
        Err(LogError::Write("disk full".into()))
    }
}
