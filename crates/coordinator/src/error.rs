//! Error types for the transaction registry.

use thiserror::Error;
use xachain_core::ProtocolViolation;
use xachain_types::Xid;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// `begin` for an xid that is already active.
    #[error("transaction {0} is already active")]
    DuplicateTransaction(Xid),

    /// No active transaction with this xid.
    #[error("transaction {0} not found")]
    NotFound(Xid),

    /// The request breaks a protocol rule.
    #[error(transparent)]
    Rejected(#[from] ProtocolViolation),
}

impl RegistryError {
    /// The violation reported back to the requester.
    pub fn into_violation(self) -> ProtocolViolation {
        match self {
            RegistryError::DuplicateTransaction(_) => ProtocolViolation::DuplicateTransaction,
            RegistryError::NotFound(_) => ProtocolViolation::UnknownTransaction,
            RegistryError::Rejected(violation) => violation,
        }
    }
}
