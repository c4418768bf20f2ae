//! Remote protocol configuration.

use xachain_types::ServerId;

/// Configuration for the remote protocol handler.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// How this coordinator is addressed by its peers. Sent in retry
    /// requests so subordinates know whose transactions to re-report.
    pub local_server: ServerId,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            local_server: ServerId::new("tm-local"),
        }
    }
}

impl RemoteConfig {
    pub fn new(local_server: ServerId) -> Self {
        Self { local_server }
    }

    pub fn with_local_server(mut self, local_server: ServerId) -> Self {
        self.local_server = local_server;
        self
    }
}
