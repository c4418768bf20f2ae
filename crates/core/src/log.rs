//! Decision log collaborator.

use parking_lot::Mutex;
use thiserror::Error;
use xachain_types::{Decision, Xid};

/// Errors from the decision log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    #[error("decision log write failed: {0}")]
    Write(String),
}

/// Durable record of transaction decisions.
///
/// Written before the phase-two requests are broadcast so a restarted
/// process can finish what it decided. The record format is up to the
/// implementation.
pub trait DecisionLog: Send + Sync {
    fn record(&self, xid: &Xid, decision: Decision) -> Result<(), LogError>;
}

/// Log that keeps nothing.
#[derive(Debug, Default)]
pub struct NoopDecisionLog;

impl DecisionLog for NoopDecisionLog {
    fn record(&self, _xid: &Xid, _decision: Decision) -> Result<(), LogError> {
        Ok(())
    }
}

/// In-memory log, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryDecisionLog {
    records: Mutex<Vec<(Xid, Decision)>>,
}

impl MemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every decision recorded so far, in order.
    pub fn records(&self) -> Vec<(Xid, Decision)> {
        self.records.lock().clone()
    }

    /// The last decision recorded for `xid`.
    pub fn decision_for(&self, xid: &Xid) -> Option<Decision> {
        self.records
            .lock()
            .iter()
            .rev()
            .find(|(logged, _)| logged == xid)
            .map(|(_, decision)| *decision)
    }
}

impl DecisionLog for MemoryDecisionLog {
    fn record(&self, xid: &Xid, decision: Decision) -> Result<(), LogError> {
        self.records.lock().push((xid.clone(), decision));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xachain_types::test_utils::test_xid;

    #[test]
    fn test_memory_log_keeps_order() {
        let log = MemoryDecisionLog::new();
        log.record(&test_xid(1), Decision::Commit).unwrap();
        log.record(&test_xid(2), Decision::Rollback).unwrap();

        assert_eq!(log.records().len(), 2);
        assert_eq!(log.decision_for(&test_xid(2)), Some(Decision::Rollback));
        assert_eq!(log.decision_for(&test_xid(3)), None);
    }
}
