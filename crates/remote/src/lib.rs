//! Superior/subordinate remote protocol.
//!
//! When a branch of a transaction is another coordinator, the two talk over a
//! [`RemoteLink`](xachain_core::RemoteLink):
//!
//! ```text
//!   superior                          subordinate
//!      │ ── OrderToPrepare(branch) ──▶ │
//!      │ ◀──────── Ready(branch) ───── │   every local branch prepared
//!      │ ── OrderToCommit(branch) ───▶ │
//!      │ ◀── Done(branch, outcome) ─── │   every local branch finished
//! ```
//!
//! The [`RemoteHandler`] sits on both ends. It turns branch requests for remote
//! participants into orders, local readiness and completion into reports, and
//! inbound messages back into coordinator events. Failed deliveries go to the
//! watchdog; when a retry is due the message is recomputed from the registry
//! (see [`status`]) so a retry never re-sends stale state.

mod config;
mod state;
pub mod status;

pub use config::RemoteConfig;
pub use state::RemoteHandler;
