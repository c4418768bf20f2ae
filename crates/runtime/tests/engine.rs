//! Engine tests on the tokio runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing_test::traced_test;
use xachain_core::{
    Event, LinkError, MemoryDecisionLog, NoopDecisionLog, Participant, ProtocolViolation,
    RemoteLink, RemoteMessage, Resource, ResourceError, ResourceHandle, RollbackReason,
};
use xachain_runtime::{Dispatcher, DispatchError, Engine, EngineConfig};
use xachain_test_helpers::{
    test_branch, test_xid, FailingDecisionLog, RecordingLink, ScriptedResource,
};
use xachain_types::{Decision, ServerId, Vote, Xid};
use xachain_watchdog::{RetryPolicy, WatchdogConfig};

fn config(server: &str) -> EngineConfig {
    EngineConfig::new(ServerId::new(server))
        .with_coordinator_workers(2)
        .with_resource_workers(2)
        .with_watchdog(WatchdogConfig::default().with_retry_policy(RetryPolicy::Fixed {
            interval: Duration::from_millis(20),
        }))
}

fn start(config: EngineConfig) -> Engine {
    Engine::start(
        config,
        Arc::new(RecordingLink::new()),
        Arc::new(NoopDecisionLog),
    )
    .unwrap()
}

/// Wait for the next outcome event of `xid`.
async fn outcome(rx: &mut broadcast::Receiver<Event>, xid: &Xid) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if event.xid() == Some(xid) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

#[traced_test]
#[tokio::test]
async fn test_commit_two_local_branches() {
    let log = Arc::new(MemoryDecisionLog::new());
    let engine = Engine::start(config("tm-a"), Arc::new(RecordingLink::new()), log.clone()).unwrap();
    let mut outcomes = engine.subscribe_outcomes();
    let xid = test_xid(1);

    engine.begin(xid.clone(), None, None).await.unwrap();
    let mut logs = Vec::new();
    for n in 1..=2 {
        let branch = test_branch(&xid, n);
        let (participant, calls) = ScriptedResource::new(format!("db-{n}")).into_participant();
        engine
            .register_branch(xid.clone(), branch.clone(), participant)
            .await
            .unwrap();
        logs.push((branch, calls));
    }
    engine.submit_commit(xid.clone()).await.unwrap();

    assert_eq!(
        outcome(&mut outcomes, &xid).await,
        Event::TransactionCommitted { xid: xid.clone() }
    );
    for (branch, calls) in &logs {
        assert_eq!(calls.prepare_calls(branch), 1);
        assert!(calls.committed(branch));
    }
    assert_eq!(log.decision_for(&xid), Some(Decision::Commit));
    engine.shutdown().await;
}

#[traced_test]
#[tokio::test]
async fn test_prepare_failure_rolls_back() {
    let engine = start(config("tm-a"));
    let mut outcomes = engine.subscribe_outcomes();
    let xid = test_xid(1);
    let good = test_branch(&xid, 1);
    let bad = test_branch(&xid, 2);

    engine.begin(xid.clone(), None, None).await.unwrap();
    let (participant, good_calls) = ScriptedResource::new("good").into_participant();
    engine.register_branch(xid.clone(), good.clone(), participant).await.unwrap();
    let (participant, bad_calls) = ScriptedResource::new("bad")
        .failing_prepare("lock timeout")
        .into_participant();
    engine.register_branch(xid.clone(), bad.clone(), participant).await.unwrap();
    engine.submit_commit(xid.clone()).await.unwrap();

    assert!(matches!(
        outcome(&mut outcomes, &xid).await,
        Event::TransactionFailedToPrepare { branch, .. } if branch == bad
    ));
    assert!(good_calls.rolled_back(&good));
    assert_eq!(good_calls.commit_calls(&good), 0);
    assert_eq!(bad_calls.commit_calls(&bad), 0);
    engine.shutdown().await;
}

#[traced_test]
#[tokio::test]
async fn test_commit_retried_until_success() {
    let engine = start(config("tm-a"));
    let mut outcomes = engine.subscribe_outcomes();
    let xid = test_xid(1);
    let branch = test_branch(&xid, 1);

    engine.begin(xid.clone(), None, None).await.unwrap();
    let (participant, calls) = ScriptedResource::new("flaky").failing_commits(2).into_participant();
    engine.register_branch(xid.clone(), branch.clone(), participant).await.unwrap();
    engine.submit_commit(xid.clone()).await.unwrap();

    assert_eq!(
        outcome(&mut outcomes, &xid).await,
        Event::TransactionCommitted { xid: xid.clone() }
    );
    assert_eq!(calls.commit_calls(&branch), 3);
    engine.shutdown().await;
}

/// Blocks in prepare until the test opens the gate.
struct Gated(std::sync::mpsc::Receiver<()>);

impl Resource for Gated {
    fn prepare(&mut self, _branch: &Xid) -> Result<Vote, ResourceError> {
        self.0
            .recv()
            .map_err(|_| ResourceError::Unavailable("gate dropped".into()))?;
        Ok(Vote::Commit)
    }

    fn commit(&mut self, _branch: &Xid, _one_phase: bool) -> Result<(), ResourceError> {
        Ok(())
    }

    fn rollback(&mut self, _branch: &Xid) -> Result<(), ResourceError> {
        Ok(())
    }
}

#[traced_test]
#[tokio::test]
async fn test_slow_resource_does_not_stall_other_transactions() {
    // One resource worker, so both transactions share it.
    let engine = start(config("tm-a").with_resource_workers(1));
    let mut outcomes = engine.subscribe_outcomes();
    let (gate, opened) = std::sync::mpsc::channel();
    let slow = test_xid(1);
    let fast = test_xid(2);

    engine.begin(slow.clone(), None, None).await.unwrap();
    engine
        .register_branch(
            slow.clone(),
            test_branch(&slow, 1),
            Participant::Local(ResourceHandle::new(Gated(opened))),
        )
        .await
        .unwrap();
    engine.submit_commit(slow.clone()).await.unwrap();

    engine.begin(fast.clone(), None, None).await.unwrap();
    let (participant, _) = ScriptedResource::new("fast").into_participant();
    engine
        .register_branch(fast.clone(), test_branch(&fast, 1), participant)
        .await
        .unwrap();
    engine.submit_commit(fast.clone()).await.unwrap();

    let resolved = tokio::time::timeout(Duration::from_secs(1), outcome(&mut outcomes, &fast)).await;
    assert_eq!(resolved.unwrap(), Event::TransactionCommitted { xid: fast.clone() });

    gate.send(()).unwrap();
    assert_eq!(
        outcome(&mut outcomes, &slow).await,
        Event::TransactionCommitted { xid: slow.clone() }
    );
    engine.shutdown().await;
}

#[traced_test]
#[tokio::test]
async fn test_deadline_rolls_back_idle_transaction() {
    let engine = start(config("tm-a"));
    let mut outcomes = engine.subscribe_outcomes();
    let xid = test_xid(1);
    let branch = test_branch(&xid, 1);

    engine
        .begin(xid.clone(), None, Some(Duration::from_millis(50)))
        .await
        .unwrap();
    let (participant, calls) = ScriptedResource::new("db").into_participant();
    engine.register_branch(xid.clone(), branch.clone(), participant).await.unwrap();

    assert_eq!(
        outcome(&mut outcomes, &xid).await,
        Event::TransactionRolledBack {
            xid: xid.clone(),
            reason: RollbackReason::Timeout,
        }
    );
    assert!(calls.rolled_back(&branch));
    engine.shutdown().await;
}

#[traced_test]
#[tokio::test]
async fn test_decision_log_failure_is_not_fatal() {
    let engine = Engine::start(
        config("tm-a"),
        Arc::new(RecordingLink::new()),
        Arc::new(FailingDecisionLog),
    )
    .unwrap();
    let mut outcomes = engine.subscribe_outcomes();
    let xid = test_xid(1);

    engine.begin(xid.clone(), None, None).await.unwrap();
    let (participant, _) = ScriptedResource::new("db").into_participant();
    engine
        .register_branch(xid.clone(), test_branch(&xid, 1), participant)
        .await
        .unwrap();
    engine.submit_commit(xid.clone()).await.unwrap();

    assert_eq!(
        outcome(&mut outcomes, &xid).await,
        Event::TransactionCommitted { xid: xid.clone() }
    );
    engine.shutdown().await;
}

#[traced_test]
#[tokio::test]
async fn test_invalid_requests_rejected() {
    let engine = start(config("tm-a"));
    let mut outcomes = engine.subscribe_outcomes();

    let unknown = test_xid(9);
    engine.submit_commit(unknown.clone()).await.unwrap();
    assert_eq!(
        outcome(&mut outcomes, &unknown).await,
        Event::RequestRejected {
            xid: unknown,
            violation: ProtocolViolation::UnknownTransaction,
        }
    );

    let xid = test_xid(1);
    engine.begin(xid.clone(), None, None).await.unwrap();
    engine.begin(xid.clone(), None, None).await.unwrap();
    assert_eq!(
        outcome(&mut outcomes, &xid).await,
        Event::RequestRejected {
            xid: xid.clone(),
            violation: ProtocolViolation::DuplicateTransaction,
        }
    );
    engine.shutdown().await;
}

#[traced_test]
#[tokio::test]
async fn test_shutdown_closes_dispatcher() {
    let engine = start(config("tm-a"));
    let dispatcher: Dispatcher = engine.dispatcher().clone();
    engine.shutdown().await;

    assert_eq!(
        dispatcher
            .publish(Event::SubmitCommit { xid: test_xid(1) })
            .await,
        Err(DispatchError::Closed)
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Two engines
// ═══════════════════════════════════════════════════════════════════════════

type Mailbox = mpsc::UnboundedSender<(ServerId, RemoteMessage)>;

/// In-process link: sends land in the peer's mailbox.
struct ChannelLink {
    from: ServerId,
    peers: HashMap<ServerId, Mailbox>,
}

impl RemoteLink for ChannelLink {
    fn send(&self, to: &ServerId, message: &RemoteMessage) -> Result<(), LinkError> {
        let mailbox = self
            .peers
            .get(to)
            .ok_or_else(|| LinkError::Unreachable(to.clone()))?;
        mailbox
            .send((self.from.clone(), message.clone()))
            .map_err(|_| LinkError::Unreachable(to.clone()))
    }
}

/// Deliver everything arriving in `mailbox` to `dispatcher`.
fn pump(mut mailbox: mpsc::UnboundedReceiver<(ServerId, RemoteMessage)>, dispatcher: Dispatcher) {
    tokio::spawn(async move {
        while let Some((from, message)) = mailbox.recv().await {
            if dispatcher
                .publish(Event::RemoteMessageReceived { from, message })
                .await
                .is_err()
            {
                break;
            }
        }
    });
}

#[traced_test]
#[tokio::test]
async fn test_superior_and_subordinate_commit() {
    let (a, b) = (ServerId::new("tm-a"), ServerId::new("tm-b"));
    let (to_a, inbox_a) = mpsc::unbounded_channel();
    let (to_b, inbox_b) = mpsc::unbounded_channel();

    let link_a = ChannelLink {
        from: a.clone(),
        peers: HashMap::from([(b.clone(), to_b)]),
    };
    let link_b = ChannelLink {
        from: b.clone(),
        peers: HashMap::from([(a.clone(), to_a)]),
    };
    let superior = Engine::start(config("tm-a"), Arc::new(link_a), Arc::new(NoopDecisionLog)).unwrap();
    let subordinate =
        Engine::start(config("tm-b"), Arc::new(link_b), Arc::new(NoopDecisionLog)).unwrap();
    pump(inbox_a, superior.dispatcher().clone());
    pump(inbox_b, subordinate.dispatcher().clone());

    let mut superior_outcomes = superior.subscribe_outcomes();
    let mut subordinate_outcomes = subordinate.subscribe_outcomes();

    let xid = test_xid(1);
    let remote = test_branch(&xid, 2);
    let local_a = test_branch(&xid, 1);
    let local_b = test_branch(&remote, 11);

    subordinate.begin(remote.clone(), Some(a.clone()), None).await.unwrap();
    let (participant, calls_b) = ScriptedResource::new("db-b").into_participant();
    subordinate
        .register_branch(remote.clone(), local_b.clone(), participant)
        .await
        .unwrap();

    superior.begin(xid.clone(), None, None).await.unwrap();
    let (participant, calls_a) = ScriptedResource::new("db-a").into_participant();
    superior
        .register_branch(xid.clone(), local_a.clone(), participant)
        .await
        .unwrap();
    superior
        .register_branch(xid.clone(), remote.clone(), Participant::Remote(b.clone()))
        .await
        .unwrap();
    superior.submit_commit(xid.clone()).await.unwrap();

    assert_eq!(
        outcome(&mut superior_outcomes, &xid).await,
        Event::TransactionCommitted { xid: xid.clone() }
    );
    assert_eq!(
        outcome(&mut subordinate_outcomes, &remote).await,
        Event::TransactionCommitted { xid: remote.clone() }
    );
    assert!(calls_a.committed(&local_a));
    assert!(calls_b.committed(&local_b));

    superior.shutdown().await;
    subordinate.shutdown().await;
}
