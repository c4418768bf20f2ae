//! Tokio runtime for the coordination engine.
//!
//! Runs the sans-IO state machines as actors ("bolts") connected by an
//! explicit event [`Dispatcher`]:
//!
//! ```text
//!   client ──► Engine ──publish──► Dispatcher ──► coordinator pool (by xid)
//!                                      │      ──► remote handler ──► RemoteLink
//!                                      │      ──► watchdog (owns timers)
//!                                      │      ──► resource pool (blocking I/O)
//!                                      └────────► outcomes ──► subscribers
//! ```
//!
//! Each bolt drains its own bounded inbox one event at a time. A full inbox
//! blocks the publisher, so a slow resource pool slows the coordinator down
//! instead of growing queues without bound.

pub mod bolt;
pub mod bolts;
mod config;
pub mod dispatcher;
mod engine;
mod error;
pub mod telemetry;

pub use config::{ConfigError, EngineConfig};
pub use dispatcher::Dispatcher;
pub use engine::Engine;
pub use error::{DispatchError, EngineError};
