//! Timeouts and retries.
//!
//! The [`Watchdog`] owns every timer in the engine:
//!
//! - One deadline per active transaction, armed when it begins and re-armed
//!   after each expiry until the transaction finishes.
//! - One retry timer per failed post-decision operation, spaced by the
//!   configured [`RetryPolicy`] and bounded by a retry ceiling.
//!
//! It never touches transactions; expiries go back on the bus as
//! `TransactionTimedOut` and `RetryDue` and the owning component acts on them.

mod config;
mod state;

pub use config::{RetryPolicy, WatchdogConfig};
pub use state::Watchdog;
