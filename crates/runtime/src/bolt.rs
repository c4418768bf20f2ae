//! Actors draining one inbox each.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument};
use xachain_core::Event;

/// An actor that handles events one at a time.
#[async_trait]
pub trait Bolt: Send + 'static {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Handle one event. Never called concurrently.
    async fn process(&mut self, event: Event);
}

/// Run `bolt` on its own task until the inbox closes or shutdown is
/// signalled.
///
/// A panic while handling an event is logged and the bolt moves on to the
/// next event.
pub fn spawn_bolt<B: Bolt>(
    mut bolt: B,
    mut inbox: mpsc::Receiver<Event>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(bolt = bolt.name(), "Bolt started");
        loop {
            let event = tokio::select! {
                _ = shutdown.recv() => break,
                event = inbox.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let kind = event.kind();
            let xid = event.xid().cloned();
            if AssertUnwindSafe(bolt.process(event))
                .catch_unwind()
                .await
                .is_err()
            {
                error!(bolt = bolt.name(), ?kind, xid = ?xid, "Bolt panicked handling event");
            }
        }
        debug!(bolt = bolt.name(), "Bolt stopped");
    }
    .in_current_span())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_test::traced_test;
    use xachain_test_helpers::test_xid;

    struct Fragile {
        handled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Bolt for Fragile {
        fn name(&self) -> &str {
            "fragile"
        }

        async fn process(&mut self, event: Event) {
            if matches!(event, Event::SubmitRollback { .. }) {
                panic!("cannot handle rollback");
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn test_bolt_survives_panic() {
        let handled = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_bolt(
            Fragile {
                handled: handled.clone(),
            },
            rx,
            shutdown_rx,
        );

        tx.send(Event::SubmitCommit { xid: test_xid(1) }).await.unwrap();
        tx.send(Event::SubmitRollback { xid: test_xid(2) }).await.unwrap();
        tx.send(Event::SubmitCommit { xid: test_xid(3) }).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 2);
        assert!(logs_contain("Bolt panicked handling event"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_bolt() {
        let (_tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_bolt(
            Fragile {
                handled: Arc::new(AtomicUsize::new(0)),
            },
            rx,
            shutdown_rx,
        );
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
