//! Two-phase commit coordination.
//!
//! This crate holds the [`Registry`] of in-flight transactions and the
//! [`TwoPhaseCoordinator`] state machine that drives each of them through
//! prepare, commit and rollback:
//!
//! - Prepare fan-out and vote tallying
//! - Commit/rollback fan-out once the decision is made
//! - Retry requests for branches that fail after the decision
//! - Subordinate transactions that wait for remote orders
//!
//! The coordinator performs no I/O. Branch work goes out as request events,
//! replies come back as events, and the decision log write is an action.

mod config;
mod error;
mod registry;
mod state;
mod transaction;
pub mod trackers;

pub use config::CoordinatorConfig;
pub use error::RegistryError;
pub use registry::Registry;
pub use state::TwoPhaseCoordinator;
pub use transaction::{Branch, Transaction};
