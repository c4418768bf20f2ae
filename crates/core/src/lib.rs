//! Core types for the xachain coordination engine.
//!
//! Every component communicates through immutable [`Event`]s and asks its
//! runner for side effects through [`Action`]s. The coordinator, the remote
//! protocol handler and the watchdog are [`StateMachine`]s: synchronous,
//! deterministic and free of I/O. Runners (the tokio runtime and the
//! deterministic simulation) own the inboxes, the timers and the calls into
//! the external collaborators defined here: [`Resource`], [`RemoteLink`] and
//! [`DecisionLog`].

mod action;
mod event;
mod link;
mod log;
mod outcome;
mod resource;
mod traits;

pub use action::{Action, RetryTarget, TimerId};
pub use event::{Event, EventKind};
pub use link::{LinkError, RemoteLink};
pub use log::{DecisionLog, LogError, MemoryDecisionLog, NoopDecisionLog};
pub use outcome::{Anomaly, AnomalyKind, ProtocolViolation, RollbackReason};
pub use resource::{Participant, Resource, ResourceAdapter, ResourceError, ResourceHandle};
pub use traits::StateMachine;

pub use xachain_messages::RemoteMessage;
