//! Publish/subscribe event bus.
//!
//! The dispatcher is constructed explicitly and handed to every bolt; there
//! is no process-wide bus. Delivery is FIFO per inbox; nothing is promised
//! across inboxes or across event kinds.

use crate::error::DispatchError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use xachain_core::{Event, EventKind};

/// One subscriber: a single inbox or a pool that counts as one.
#[derive(Clone)]
enum Route {
    Single {
        name: Arc<str>,
        inbox: mpsc::Sender<Event>,
    },
    Pool {
        name: Arc<str>,
        members: Arc<[mpsc::Sender<Event>]>,
    },
}

impl Route {
    /// The inbox that receives `event`.
    ///
    /// Pool members are chosen by the transaction's route key so all events
    /// of one transaction land, in order, on the same member.
    fn inbox_for(&self, event: &Event) -> (&Arc<str>, &mpsc::Sender<Event>) {
        match self {
            Route::Single { name, inbox } => (name, inbox),
            Route::Pool { name, members } => {
                let key = event.xid().map(|xid| xid.route_key()).unwrap_or(0);
                let index = (key % members.len() as u64) as usize;
                (name, &members[index])
            }
        }
    }
}

struct Inner {
    routes: RwLock<HashMap<EventKind, Vec<Route>>>,
    closed: AtomicBool,
}

/// Routes events to subscriber inboxes by [`EventKind`].
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                routes: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a single subscriber for `kinds`.
    pub fn subscribe(&self, name: &str, kinds: &[EventKind], inbox: mpsc::Sender<Event>) {
        self.add_route(
            kinds,
            Route::Single {
                name: Arc::from(name),
                inbox,
            },
        );
    }

    /// Register a worker pool that receives each event on exactly one member.
    pub fn subscribe_pool(&self, name: &str, kinds: &[EventKind], members: Vec<mpsc::Sender<Event>>) {
        if members.is_empty() {
            warn!(pool = name, "Ignoring subscription of an empty pool");
            return;
        }
        self.add_route(
            kinds,
            Route::Pool {
                name: Arc::from(name),
                members: members.into(),
            },
        );
    }

    fn add_route(&self, kinds: &[EventKind], route: Route) {
        let mut routes = self.inner.routes.write();
        for kind in kinds {
            routes.entry(*kind).or_default().push(route.clone());
        }
    }

    /// Number of subscribers for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.routes.read().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every subscriber of its kind.
    ///
    /// Waits while a target inbox is full. An event nobody subscribes to is
    /// dropped.
    pub async fn publish(&self, event: Event) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }

        let targets: Vec<(Arc<str>, mpsc::Sender<Event>)> = {
            let routes = self.inner.routes.read();
            match routes.get(&event.kind()) {
                Some(routes) => routes
                    .iter()
                    .map(|route| {
                        let (name, inbox) = route.inbox_for(&event);
                        (name.clone(), inbox.clone())
                    })
                    .collect(),
                None => Vec::new(),
            }
        };

        if targets.is_empty() {
            trace!(kind = ?event.kind(), "No subscribers");
            return Ok(());
        }

        for (name, inbox) in targets {
            if inbox.send(event.clone()).await.is_err() {
                debug!(subscriber = %name, kind = ?event.kind(), "Subscriber inbox closed");
            }
        }
        Ok(())
    }

    /// Refuse further publishes and drop every route.
    ///
    /// Bolts see their inbox close once the last sender is gone.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.routes.write().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use xachain_test_helpers::test_xid;

    fn committed(n: u64) -> Event {
        Event::TransactionCommitted { xid: test_xid(n) }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let dispatcher = Dispatcher::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        dispatcher.subscribe("a", &[EventKind::TransactionCommitted], tx_a);
        dispatcher.subscribe("b", EventKind::OUTCOMES, tx_b);

        dispatcher.publish(committed(1)).await.unwrap();
        dispatcher
            .publish(Event::SubmitCommit { xid: test_xid(1) })
            .await
            .unwrap();

        assert_eq!(rx_a.recv().await, Some(committed(1)));
        assert_eq!(rx_b.recv().await, Some(committed(1)));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pool_keeps_transaction_on_one_member() {
        let dispatcher = Dispatcher::new();
        let mut senders = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = mpsc::channel(64);
            senders.push(tx);
            receivers.push(rx);
        }
        dispatcher.subscribe_pool("pool", &[EventKind::TransactionCommitted], senders);

        for _ in 0..3 {
            for n in 0..8 {
                dispatcher.publish(committed(n)).await.unwrap();
            }
        }

        let mut seen = HashMap::new();
        let mut total = 0;
        for (member, rx) in receivers.iter_mut().enumerate() {
            while let Ok(event) = rx.try_recv() {
                total += 1;
                let xid = event.xid().cloned().unwrap();
                assert_eq!(*seen.entry(xid).or_insert(member), member);
            }
        }
        assert_eq!(total, 24, "each event delivered exactly once");
        assert_eq!(seen.len(), 8);
    }

    #[tokio::test]
    async fn test_full_inbox_applies_backpressure() {
        let dispatcher = Dispatcher::new();
        let (tx, mut rx) = mpsc::channel(1);
        dispatcher.subscribe("slow", &[EventKind::TransactionCommitted], tx);

        dispatcher.publish(committed(1)).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), dispatcher.publish(committed(2))).await;
        assert!(blocked.is_err(), "publish must wait for room");

        assert_eq!(rx.recv().await, Some(committed(1)));
        dispatcher.publish(committed(3)).await.unwrap();
        assert_eq!(rx.recv().await, Some(committed(3)));
    }

    #[tokio::test]
    async fn test_closed_dispatcher_refuses() {
        let dispatcher = Dispatcher::new();
        let (tx, mut rx) = mpsc::channel(1);
        dispatcher.subscribe("a", &[EventKind::TransactionCommitted], tx);
        assert_eq!(dispatcher.subscriber_count(EventKind::TransactionCommitted), 1);

        dispatcher.close();
        assert_eq!(dispatcher.publish(committed(1)).await, Err(DispatchError::Closed));
        assert_eq!(rx.recv().await, None);
    }
}
