//! Registry of active transactions.
//!
//! Concurrent map from global xid to transaction record. Each record sits
//! behind its own mutex: work on different transactions never contends, and
//! all work on one transaction is serialized.
//!
//! Two secondary indexes are kept alongside:
//! - branch xid → owning transaction, to route remote status reports
//! - resource handle → owning transaction, so a handle is enlisted in at most
//!   one active transaction at a time
//!
//! Lock order is record mutex, then index shard. Nothing locks a record while
//! holding a shard of the primary map.

use crate::error::RegistryError;
use crate::transaction::Transaction;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use xachain_core::{Participant, ProtocolViolation};
use xachain_types::{ResourceId, ServerId, TransactionState, Xid};

/// Shared registry of active transactions.
#[derive(Debug, Default)]
pub struct Registry {
    transactions: DashMap<Xid, Arc<Mutex<Transaction>>>,
    branch_owners: DashMap<Xid, Xid>,
    handle_owners: DashMap<ResourceId, Xid>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new transaction.
    pub fn begin(&self, transaction: Transaction) -> Result<(), RegistryError> {
        match self.transactions.entry(transaction.xid().clone()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateTransaction(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(xid = %transaction.xid(), "Transaction registered");
                entry.insert(Arc::new(Mutex::new(transaction)));
                Ok(())
            }
        }
    }

    /// Run `f` with exclusive access to the transaction.
    ///
    /// `f` must not call back into the registry.
    pub fn with_transaction<R>(
        &self,
        xid: &Xid,
        f: impl FnOnce(&mut Transaction) -> R,
    ) -> Result<R, RegistryError> {
        let record = self.record(xid)?;
        let mut guard = record.lock();
        Ok(f(&mut guard))
    }

    /// Snapshot of the transaction.
    pub fn lookup(&self, xid: &Xid) -> Result<Transaction, RegistryError> {
        self.with_transaction(xid, |tx| tx.clone())
    }

    pub fn contains(&self, xid: &Xid) -> bool {
        self.transactions.contains_key(xid)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Xids of every active transaction.
    pub fn xids(&self) -> Vec<Xid> {
        self.transactions.iter().map(|e| e.key().clone()).collect()
    }

    /// Enlist a branch.
    ///
    /// The branch must share the transaction's global id, must not be the
    /// global xid itself, and must be new. A local resource handle must not be
    /// enlisted in another active transaction.
    pub fn register_branch(
        &self,
        xid: &Xid,
        branch: Xid,
        participant: Participant,
    ) -> Result<(), RegistryError> {
        let record = self.record(xid)?;
        let mut tx = record.lock();

        if tx.state() != TransactionState::Active {
            return Err(ProtocolViolation::InvalidState(tx.state()).into());
        }
        if !branch.same_global(xid) || branch.is_global() {
            return Err(ProtocolViolation::ForeignBranch(branch).into());
        }
        if tx.branch(&branch).is_some() || self.branch_owners.contains_key(&branch) {
            return Err(ProtocolViolation::DuplicateBranch(branch).into());
        }

        if let Participant::Local(handle) = &participant {
            match self.handle_owners.entry(handle.id()) {
                Entry::Occupied(entry) if entry.get() != xid => {
                    return Err(ProtocolViolation::HandleInUse {
                        resource: handle.id(),
                        owner: entry.get().clone(),
                    }
                    .into());
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(xid.clone());
                }
            }
        }

        self.branch_owners.insert(branch.clone(), xid.clone());
        debug!(xid = %xid, branch = %branch, remote = participant.is_remote(), "Branch registered");
        tx.add_branch(branch, participant);
        Ok(())
    }

    /// The transaction a branch belongs to.
    pub fn owner_of(&self, branch: &Xid) -> Option<Xid> {
        self.branch_owners.get(branch).map(|owner| owner.clone())
    }

    /// Active transactions reporting to `superior`.
    pub fn subordinates_of(&self, superior: &ServerId) -> Vec<Xid> {
        let records: Vec<_> = self
            .transactions
            .iter()
            .map(|e| e.value().clone())
            .collect();
        records
            .into_iter()
            .filter_map(|record| {
                let tx = record.lock();
                (tx.superior() == Some(superior)).then(|| tx.xid().clone())
            })
            .collect()
    }

    /// Drop a finished transaction and release its branches and handles.
    pub fn remove(&self, xid: &Xid) -> Option<Transaction> {
        let (_, record) = self.transactions.remove(xid)?;
        let tx = record.lock().clone();
        for branch in tx.branches() {
            self.branch_owners.remove(&branch.xid);
            if let Participant::Local(handle) = &branch.participant {
                self.handle_owners.remove_if(&handle.id(), |_, owner| owner == xid);
            }
        }
        debug!(xid = %xid, "Transaction removed");
        Some(tx)
    }

    fn record(&self, xid: &Xid) -> Result<Arc<Mutex<Transaction>>, RegistryError> {
        self.transactions
            .get(xid)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::NotFound(xid.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use xachain_core::ResourceHandle;
    use xachain_test_helpers::ScriptedResource;
    use xachain_types::test_utils::{test_branch, test_xid};

    fn begin(registry: &Registry, xid: &Xid) {
        registry
            .begin(Transaction::new(
                xid.clone(),
                None,
                Duration::ZERO,
                Duration::from_secs(10),
            ))
            .unwrap();
    }

    fn local() -> Participant {
        Participant::Local(ResourceHandle::new(ScriptedResource::new("db")))
    }

    #[test]
    fn test_duplicate_begin_rejected() {
        let registry = Registry::new();
        let xid = test_xid(1);
        begin(&registry, &xid);
        let again = registry.begin(Transaction::new(
            xid.clone(),
            None,
            Duration::ZERO,
            Duration::from_secs(10),
        ));
        assert_eq!(again, Err(RegistryError::DuplicateTransaction(xid)));
    }

    #[test]
    fn test_register_branch_rules() {
        let registry = Registry::new();
        let xid = test_xid(1);
        begin(&registry, &xid);

        let branch = test_branch(&xid, 1);
        registry.register_branch(&xid, branch.clone(), local()).unwrap();
        assert_eq!(registry.owner_of(&branch), Some(xid.clone()));

        assert_eq!(
            registry.register_branch(&xid, branch.clone(), local()),
            Err(ProtocolViolation::DuplicateBranch(branch).into())
        );

        let foreign = test_branch(&test_xid(2), 1);
        assert_eq!(
            registry.register_branch(&xid, foreign.clone(), local()),
            Err(ProtocolViolation::ForeignBranch(foreign).into())
        );

        assert_eq!(
            registry.register_branch(&xid, xid.clone(), local()),
            Err(ProtocolViolation::ForeignBranch(xid.clone()).into())
        );

        let unknown = test_xid(3);
        assert_eq!(
            registry.register_branch(&unknown, test_branch(&unknown, 1), local()),
            Err(RegistryError::NotFound(unknown))
        );
    }

    #[test]
    fn test_handle_enlisted_in_one_transaction() {
        let registry = Registry::new();
        let (first, second) = (test_xid(1), test_xid(2));
        begin(&registry, &first);
        begin(&registry, &second);

        let handle = ResourceHandle::new(ScriptedResource::new("db"));
        registry
            .register_branch(&first, test_branch(&first, 1), Participant::Local(handle.clone()))
            .unwrap();
        // Reuse within the same transaction is fine.
        registry
            .register_branch(&first, test_branch(&first, 2), Participant::Local(handle.clone()))
            .unwrap();

        let err = registry
            .register_branch(&second, test_branch(&second, 1), Participant::Local(handle.clone()))
            .unwrap_err();
        assert_eq!(
            err.into_violation(),
            ProtocolViolation::HandleInUse {
                resource: handle.id(),
                owner: first.clone(),
            }
        );

        registry.remove(&first);
        registry
            .register_branch(&second, test_branch(&second, 1), Participant::Local(handle))
            .unwrap();
    }

    #[test]
    fn test_registration_closed_after_prepare_starts() {
        let registry = Registry::new();
        let xid = test_xid(1);
        begin(&registry, &xid);
        registry
            .with_transaction(&xid, |tx| tx.advance(TransactionState::Preparing))
            .unwrap();

        assert_eq!(
            registry.register_branch(&xid, test_branch(&xid, 1), local()),
            Err(ProtocolViolation::InvalidState(TransactionState::Preparing).into())
        );
    }

    #[test]
    fn test_subordinates_of_superior() {
        let registry = Registry::new();
        let root = ServerId::new("tm-root");
        let sub = test_xid(1);
        registry
            .begin(Transaction::new(
                sub.clone(),
                Some(root.clone()),
                Duration::ZERO,
                Duration::from_secs(10),
            ))
            .unwrap();
        begin(&registry, &test_xid(2));

        assert_eq!(registry.subordinates_of(&root), vec![sub]);
        assert!(registry.subordinates_of(&ServerId::new("tm-other")).is_empty());
    }
}
