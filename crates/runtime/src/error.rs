//! Runtime errors.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors from publishing on the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("dispatcher closed")]
    Closed,
}

/// Errors returned by the [`Engine`](crate::Engine) API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("engine is shut down")]
    ShutDown,
}

impl From<DispatchError> for EngineError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Closed => EngineError::ShutDown,
        }
    }
}
