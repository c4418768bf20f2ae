//! What a transaction owes the other end of each remote link, computed from
//! its current state.

use xachain_coordinator::{Branch, Transaction};
use xachain_messages::RemoteMessage;
use xachain_types::{BranchState, ServerId, TransactionState};

/// The report a subordinate transaction owes its superior right now.
///
/// `Ready` while prepared, `Done` once finished, nothing otherwise or when
/// the transaction has no superior.
pub fn current_report(tx: &Transaction) -> Option<(ServerId, RemoteMessage)> {
    let superior = tx.superior()?.clone();
    let message = match tx.state() {
        TransactionState::Prepared => RemoteMessage::ready(tx.xid().clone()),
        TransactionState::Committed | TransactionState::RolledBack => {
            RemoteMessage::done(tx.xid().clone(), tx.decision()?.outcome())
        }
        _ => return None,
    };
    Some((superior, message))
}

/// The order a remote branch is waiting on, if any.
pub fn pending_order(branch: &Branch) -> Option<(ServerId, RemoteMessage)> {
    let server = branch.participant.as_remote()?.clone();
    let message = match branch.state {
        BranchState::Preparing => RemoteMessage::order_to_prepare(branch.xid.clone()),
        BranchState::Committing => RemoteMessage::order_to_commit(branch.xid.clone()),
        BranchState::RollingBack => RemoteMessage::order_to_rollback(branch.xid.clone()),
        _ => return None,
    };
    Some((server, message))
}
