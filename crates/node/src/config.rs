//! Node configuration.

use xachain_coordinator::CoordinatorConfig;
use xachain_remote::RemoteConfig;
use xachain_types::ServerId;
use xachain_watchdog::WatchdogConfig;

/// Configuration for every component of a node.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub coordinator: CoordinatorConfig,
    pub remote: RemoteConfig,
    pub watchdog: WatchdogConfig,
}

impl NodeConfig {
    /// Default configuration for the node addressed as `server`.
    pub fn new(server: ServerId) -> Self {
        Self {
            remote: RemoteConfig::new(server),
            ..Self::default()
        }
    }

    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_watchdog(mut self, watchdog: WatchdogConfig) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn server(&self) -> &ServerId {
        &self.remote.local_server
    }
}
