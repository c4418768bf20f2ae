//! Ordering of scheduled events.

use crate::NodeIndex;
use std::time::Duration;

/// Tie-breaker between events scheduled for the same instant.
///
/// Internal follow-ups run before timers, timers before network deliveries,
/// and client requests last, so a request never overtakes the work it
/// triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    Internal = 0,
    Timer = 1,
    Network = 2,
    Client = 3,
}

/// Key of an event in the simulation queue.
///
/// Ordered by time, priority, node, sequence. The sequence number is unique
/// per runner, so no two keys collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub node: NodeIndex,
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        let key = |ms, priority, sequence| EventKey {
            time: Duration::from_millis(ms),
            priority,
            node: 0,
            sequence,
        };
        assert!(key(1, EventPriority::Client, 0) < key(2, EventPriority::Internal, 1));
        assert!(key(1, EventPriority::Internal, 5) < key(1, EventPriority::Timer, 2));
        assert!(key(1, EventPriority::Timer, 1) < key(1, EventPriority::Timer, 2));
    }
}
