//! Coordinator configuration.

use std::time::Duration;

/// Configuration for the two-phase commit coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline applied to transactions that do not name their own.
    pub default_timeout: Duration,

    /// Commit a transaction with exactly one local branch and no superior in
    /// a single phase, skipping prepare.
    pub one_phase_optimization: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            one_phase_optimization: false,
        }
    }
}

impl CoordinatorConfig {
    /// Set the default transaction deadline.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Enable or disable the one-phase commit optimization.
    pub fn with_one_phase_optimization(mut self, enabled: bool) -> Self {
        self.one_phase_optimization = enabled;
        self
    }
}
