//! Per-transaction bookkeeping used by the coordinator.

mod vote;

pub use vote::{PrepareTally, TallyResult};
