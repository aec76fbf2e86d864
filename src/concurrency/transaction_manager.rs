use crate::common::config::TxnId;
use crate::concurrency::lock_manager::LockManager;
use crate::concurrency::transaction::{IsolationLevel, Transaction, TransactionState};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Creates transactions and keeps the global id-to-transaction map. The
/// lock manager resolves peers through [`get_transaction`] while holding a
/// queue latch, so lookups here must never block on lock acquisition.
///
/// [`get_transaction`]: TransactionManager::get_transaction
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    txn_map: RwLock<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(0),
            txn_map: RwLock::new(HashMap::new()),
        }
    }

    /// Begins a new transaction. Ids are handed out monotonically, so a
    /// smaller id always denotes an older transaction.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.txn_map.write().insert(txn_id, Arc::clone(&txn));
        debug!("began txn {} at {:?}", txn_id, isolation_level);
        txn
    }

    /// Global transaction lookup, used by the lock manager to wound peers.
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.read().get(&txn_id).cloned()
    }

    /// Commits the transaction, releasing every lock it still holds.
    pub fn commit(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        self.release_all_locks(txn, lock_manager);
        txn.set_state(TransactionState::Committed);
        debug!("committed txn {}", txn.get_txn_id());
    }

    /// Aborts the transaction, releasing every lock it still holds.
    pub fn abort(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        self.release_all_locks(txn, lock_manager);
        txn.set_state(TransactionState::Aborted);
        debug!("aborted txn {}", txn.get_txn_id());
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        for rid in txn.locked_rids() {
            lock_manager.unlock(txn, &rid);
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_assigns_monotonic_ids() {
        let txn_manager = TransactionManager::new();
        let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
        let t1 = txn_manager.begin(IsolationLevel::ReadCommitted);
        assert!(t0.get_txn_id() < t1.get_txn_id());
        assert!(txn_manager.get_transaction(t0.get_txn_id()).is_some());
        assert!(txn_manager.get_transaction(999).is_none());
    }
}
