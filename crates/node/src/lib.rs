//! Combined node state machine.
//!
//! This crate composes the coordinator, remote protocol handler and watchdog
//! state machines, sharing one transaction registry, into a complete
//! transaction manager node.

mod config;
mod state;

pub use config::NodeConfig;
pub use state::{NodeIndex, NodeStateMachine};
