//! Retry request from a superior that has not heard back in time.

use super::RemoteMessageType;
use serde::{Deserialize, Serialize};
use xachain_types::ServerId;

/// Ask a subordinate to re-send its last status for every transaction whose
/// superior is `server`.
///
/// The subordinate recomputes the status from its registry, so it keeps no
/// retry state of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRequest {
    /// The superior asking.
    pub server: ServerId,
}

impl RetryRequest {
    pub fn new(server: ServerId) -> Self {
        Self { server }
    }
}

impl RemoteMessageType for RetryRequest {
    fn message_type_id() -> &'static str {
        "status.retry"
    }
}
