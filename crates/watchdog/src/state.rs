//! Watchdog state machine.

use crate::config::WatchdogConfig;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use xachain_core::{
    Action, Anomaly, AnomalyKind, Event, EventKind, RetryTarget, StateMachine, TimerId,
};
use xachain_types::Xid;

const SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::TransactionBegun,
    EventKind::TransactionFinished,
    EventKind::RetryRequested,
    EventKind::TimerFired,
    EventKind::OperatorRetry,
];

/// Deadline and retry timers for every active transaction.
pub struct Watchdog {
    config: WatchdogConfig,

    /// Deadline interval per live transaction; presence means the deadline
    /// timer is armed.
    deadlines: HashMap<Xid, Duration>,

    /// Failed attempts per operation.
    attempts: HashMap<(Xid, RetryTarget), u32>,

    /// Retry timers currently armed, per transaction.
    armed: HashMap<Xid, BTreeSet<RetryTarget>>,

    now: Duration,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            deadlines: HashMap::new(),
            attempts: HashMap::new(),
            armed: HashMap::new(),
            now: Duration::ZERO,
        }
    }

    /// Number of transactions with an armed deadline.
    pub fn tracked(&self) -> usize {
        self.deadlines.len()
    }

    /// Failed attempts recorded for an operation.
    pub fn attempts(&self, xid: &Xid, target: &RetryTarget) -> u32 {
        self.attempts
            .get(&(xid.clone(), target.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn on_begun(&mut self, xid: Xid, timeout: Duration) -> Vec<Action> {
        debug!(xid = %xid, timeout_ms = timeout.as_millis() as u64, "Arming deadline");
        self.deadlines.insert(xid.clone(), timeout);
        vec![Action::SetTimer {
            id: TimerId::Deadline(xid),
            duration: timeout,
        }]
    }

    fn on_finished(&mut self, xid: Xid) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.deadlines.remove(&xid).is_some() {
            actions.push(Action::CancelTimer {
                id: TimerId::Deadline(xid.clone()),
            });
        }
        for target in self.armed.remove(&xid).unwrap_or_default() {
            actions.push(Action::CancelTimer {
                id: TimerId::Retry(xid.clone(), target),
            });
        }
        self.attempts.retain(|(x, _), _| *x != xid);
        debug!(xid = %xid, cancelled = actions.len(), "Transaction finished, timers cancelled");
        actions
    }

    fn on_retry_requested(&mut self, xid: Xid, target: RetryTarget, cause: String) -> Vec<Action> {
        let attempt = {
            let count = self
                .attempts
                .entry((xid.clone(), target.clone()))
                .or_insert(0);
            *count += 1;
            *count
        };

        if attempt > self.config.max_retries {
            error!(
                xid = %xid,
                %target,
                attempts = attempt,
                cause = %cause,
                "Retries exhausted, manual recovery required"
            );
            let (kind, branch) = match target {
                RetryTarget::Commit(branch) => (AnomalyKind::CommitRetriesExhausted, Some(branch)),
                RetryTarget::Rollback(branch) => {
                    (AnomalyKind::RollbackRetriesExhausted, Some(branch))
                }
                RetryTarget::Order(branch) => (AnomalyKind::OrderUndeliverable, Some(branch)),
                RetryTarget::Report => (AnomalyKind::ReportUndeliverable, None),
            };
            return vec![Action::publish(Event::FatalAnomaly {
                xid,
                anomaly: Anomaly {
                    kind,
                    branch,
                    attempts: attempt,
                    cause,
                },
            })];
        }

        let delay = self.config.retry_policy.delay(attempt);
        debug!(
            xid = %xid,
            %target,
            attempt,
            delay_ms = delay.as_millis() as u64,
            cause = %cause,
            "Scheduling retry"
        );
        self.armed
            .entry(xid.clone())
            .or_default()
            .insert(target.clone());
        vec![Action::SetTimer {
            id: TimerId::Retry(xid, target),
            duration: delay,
        }]
    }

    fn on_timer(&mut self, id: TimerId) -> Vec<Action> {
        match id {
            TimerId::Deadline(xid) => {
                let Some(timeout) = self.deadlines.get(&xid).copied() else {
                    debug!(xid = %xid, "Stale deadline timer");
                    return vec![];
                };
                warn!(xid = %xid, "Transaction deadline expired");
                vec![
                    Action::publish(Event::TransactionTimedOut { xid: xid.clone() }),
                    Action::SetTimer {
                        id: TimerId::Deadline(xid),
                        duration: timeout,
                    },
                ]
            }
            TimerId::Retry(xid, target) => {
                let was_armed = self
                    .armed
                    .get_mut(&xid)
                    .map(|targets| targets.remove(&target))
                    .unwrap_or(false);
                if !was_armed {
                    debug!(xid = %xid, %target, "Stale retry timer");
                    return vec![];
                }
                vec![Action::publish(Event::RetryDue { xid, target })]
            }
        }
    }

    fn on_operator_retry(&mut self, xid: Xid) -> Vec<Action> {
        let before = self.attempts.len();
        self.attempts.retain(|(x, _), _| *x != xid);
        info!(xid = %xid, cleared = before - self.attempts.len(), "Retry counters reset by operator");
        vec![]
    }
}

impl StateMachine for Watchdog {
    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::TransactionBegun { xid, timeout } => self.on_begun(xid, timeout),
            Event::TransactionFinished { xid } => self.on_finished(xid),
            Event::RetryRequested { xid, target, cause } => {
                self.on_retry_requested(xid, target, cause)
            }
            Event::TimerFired { id } => self.on_timer(id),
            Event::OperatorRetry { xid } => self.on_operator_retry(xid),
            other => {
                debug!(kind = ?other.kind(), "Watchdog ignoring event");
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
