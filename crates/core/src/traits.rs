//! Core traits for state machines.

use crate::{Action, Event, EventKind};
use std::time::Duration;

/// A state machine that processes events.
///
/// All coordination logic is implemented as state machines that are:
///
/// - **Synchronous**: No async, no `.await`
/// - **Deterministic**: Same state + event = same actions
/// - **Pure-ish**: Mutates self (and the shared registry), but performs no I/O
///
/// # Example
///
/// ```ignore
/// impl StateMachine for Watchdog {
///     fn subscriptions(&self) -> &'static [EventKind] {
///         &[EventKind::TransactionBegun, EventKind::TimerFired]
///     }
///
///     fn handle(&mut self, event: Event) -> Vec<Action> {
///         match event {
///             Event::TransactionBegun { xid, timeout } => self.on_begun(xid, timeout),
///             Event::TimerFired { id } => self.on_timer(id),
///             _ => vec![],
///         }
///     }
///     // ...
/// }
/// ```
pub trait StateMachine {
    /// Event kinds this machine wants delivered.
    ///
    /// This is the machine's dispatch table; runners use it to subscribe the
    /// machine on the bus.
    fn subscriptions(&self) -> &'static [EventKind];

    /// Process an event, returning actions to perform.
    ///
    /// # Guarantees
    ///
    /// - **Synchronous**: This method never blocks or awaits
    /// - **Deterministic**: Given the same state and event, always returns the same actions
    /// - **No I/O**: All I/O is performed by the runner via the returned actions
    ///
    /// Actions are executed in order; a machine relies on this to record a
    /// decision before publishing the requests that act on it.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Set the current time.
    ///
    /// Called by the runner before each `handle()` call to provide the
    /// current simulation or wall-clock time.
    fn set_time(&mut self, now: Duration);

    /// Get the current time.
    ///
    /// Returns the time that was last set via `set_time()`.
    fn now(&self) -> Duration;
}
