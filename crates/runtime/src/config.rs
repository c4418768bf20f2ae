//! Engine configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use xachain_coordinator::CoordinatorConfig;
use xachain_remote::RemoteConfig;
use xachain_types::ServerId;
use xachain_watchdog::{RetryPolicy, WatchdogConfig};

/// Errors loading or validating an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("retry policy maximum {max_ms}ms is below its base {base_ms}ms")]
    RetryBounds { base_ms: u64, max_ms: u64 },
}

/// Configuration for a running engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub coordinator: CoordinatorConfig,
    pub remote: RemoteConfig,
    pub watchdog: WatchdogConfig,

    /// Coordinator bolts; events are spread over them by transaction.
    pub coordinator_workers: usize,

    /// Bolts performing blocking resource calls.
    pub resource_workers: usize,

    /// Capacity of every bolt inbox.
    pub inbox_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            remote: RemoteConfig::default(),
            watchdog: WatchdogConfig::default(),
            coordinator_workers: 4,
            resource_workers: 8,
            inbox_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Default configuration for the engine addressed as `server`.
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

    pub fn with_coordinator_workers(mut self, workers: usize) -> Self {
        self.coordinator_workers = workers;
        self
    }

    pub fn with_resource_workers(mut self, workers: usize) -> Self {
        self.resource_workers = workers;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    pub fn server(&self) -> &ServerId {
        &self.remote.local_server
    }

    /// Check the values an engine cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("coordinator_workers", self.coordinator_workers),
            ("resource_workers", self.resource_workers),
            ("inbox_capacity", self.inbox_capacity),
        ];
        if let Some(&(field, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.coordinator.default_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "default_timeout_ms",
            });
        }
        if let RetryPolicy::CappedExponential { base, max } = self.watchdog.retry_policy {
            if max < base {
                return Err(ConfigError::RetryBounds {
                    base_ms: base.as_millis() as u64,
                    max_ms: max.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    /// Parse the TOML file form.
    ///
    /// ```toml
    /// server = "tm-a"
    /// coordinator_workers = 4
    ///
    /// [coordinator]
    /// default_timeout_ms = 30000
    /// one_phase_optimization = true
    ///
    /// [watchdog]
    /// max_retries = 10
    /// retry = { policy = "capped_exponential", base_ms = 100, max_ms = 5000 }
    /// ```
    ///
    /// Omitted keys keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let file: EngineFile = toml::from_str(input)?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// File form
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EngineFile {
    server: Option<String>,
    coordinator_workers: Option<usize>,
    resource_workers: Option<usize>,
    inbox_capacity: Option<usize>,
    coordinator: CoordinatorFile,
    watchdog: WatchdogFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CoordinatorFile {
    default_timeout_ms: Option<u64>,
    one_phase_optimization: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WatchdogFile {
    max_retries: Option<u32>,
    retry: Option<RetryFile>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
enum RetryFile {
    Fixed { interval_ms: u64 },
    CappedExponential { base_ms: u64, max_ms: u64 },
}

impl From<RetryFile> for RetryPolicy {
    fn from(file: RetryFile) -> Self {
        match file {
            RetryFile::Fixed { interval_ms } => RetryPolicy::Fixed {
                interval: Duration::from_millis(interval_ms),
            },
            RetryFile::CappedExponential { base_ms, max_ms } => RetryPolicy::CappedExponential {
                base: Duration::from_millis(base_ms),
                max: Duration::from_millis(max_ms),
            },
        }
    }
}

impl EngineFile {
    fn into_config(self) -> EngineConfig {
        let mut config = match self.server {
            Some(server) => EngineConfig::new(ServerId::new(server)),
            None => EngineConfig::default(),
        };
        if let Some(workers) = self.coordinator_workers {
            config.coordinator_workers = workers;
        }
        if let Some(workers) = self.resource_workers {
            config.resource_workers = workers;
        }
        if let Some(capacity) = self.inbox_capacity {
            config.inbox_capacity = capacity;
        }
        if let Some(ms) = self.coordinator.default_timeout_ms {
            config.coordinator.default_timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = self.coordinator.one_phase_optimization {
            config.coordinator.one_phase_optimization = enabled;
        }
        if let Some(max_retries) = self.watchdog.max_retries {
            config.watchdog.max_retries = max_retries;
        }
        if let Some(retry) = self.watchdog.retry {
            config.watchdog.retry_policy = retry.into();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.coordinator_workers, 4);
        assert_eq!(config.server(), &ServerId::new("tm-local"));
        assert_eq!(config.watchdog.retry_policy, RetryPolicy::default());
    }

    #[test]
    fn test_full_file() {
        let config = EngineConfig::from_toml_str(
            r#"
            server = "tm-a"
            coordinator_workers = 2
            resource_workers = 3
            inbox_capacity = 16

            [coordinator]
            default_timeout_ms = 1500
            one_phase_optimization = true

            [watchdog]
            max_retries = 4
            retry = { policy = "fixed", interval_ms = 250 }
            "#,
        )
        .unwrap();

        assert_eq!(config.server(), &ServerId::new("tm-a"));
        assert_eq!(config.coordinator_workers, 2);
        assert_eq!(config.resource_workers, 3);
        assert_eq!(config.inbox_capacity, 16);
        assert_eq!(config.coordinator.default_timeout, Duration::from_millis(1500));
        assert!(config.coordinator.one_phase_optimization);
        assert_eq!(config.watchdog.max_retries, 4);
        assert_eq!(
            config.watchdog.retry_policy,
            RetryPolicy::Fixed {
                interval: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_invalid_files_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("coordinator_workers = 0"),
            Err(ConfigError::Zero {
                field: "coordinator_workers"
            })
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("unknown_key = 1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str(
                "[watchdog]\nretry = { policy = \"capped_exponential\", base_ms = 500, max_ms = 100 }"
            ),
            Err(ConfigError::RetryBounds {
                base_ms: 500,
                max_ms: 100
            })
        ));
    }
}
