use crate::common::config::{Lsn, TxnId, INVALID_LSN};
use crate::common::rid::RID;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::thread;

/// Transaction lifecycle under strict two-phase locking: a transaction
/// acquires locks while `Growing`, moves to `Shrinking` once it releases
/// one, and ends `Committed` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Represents a transaction. The id is immutable and doubles as the
/// transaction's age: a smaller id means an older transaction, which is
/// the sole basis of wound-wait deadlock prevention.
///
/// State and lock sets use interior mutability because the lock manager
/// mutates them from other threads (wounding a peer marks it aborted).
#[derive(Debug)]
pub struct Transaction {
    txn_id: TxnId,
    isolation_level: IsolationLevel,
    thread_id: thread::ThreadId,

    state: RwLock<TransactionState>,
    shared_lock_set: Mutex<HashSet<RID>>,
    exclusive_lock_set: Mutex<HashSet<RID>>,
    prev_lsn: RwLock<Lsn>,
}

impl Transaction {
    pub fn new(txn_id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            txn_id,
            isolation_level,
            thread_id: thread::current().id(),
            state: RwLock::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            prev_lsn: RwLock::new(INVALID_LSN),
        }
    }

    pub fn get_txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn get_isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Returns the ID of the thread that started the transaction.
    pub fn get_thread_id(&self) -> thread::ThreadId {
        self.thread_id
    }

    pub fn get_state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    pub fn get_prev_lsn(&self) -> Lsn {
        *self.prev_lsn.read()
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        *self.prev_lsn.write() = lsn;
    }

    /// Returns whether this transaction holds a shared lock on the RID.
    pub fn is_shared_locked(&self, rid: &RID) -> bool {
        self.shared_lock_set.lock().contains(rid)
    }

    /// Returns whether this transaction holds an exclusive lock on the RID.
    pub fn is_exclusive_locked(&self, rid: &RID) -> bool {
        self.exclusive_lock_set.lock().contains(rid)
    }

    pub fn add_shared_lock(&self, rid: RID) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: RID) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: &RID) {
        self.shared_lock_set.lock().remove(rid);
    }

    pub fn remove_exclusive_lock(&self, rid: &RID) {
        self.exclusive_lock_set.lock().remove(rid);
    }

    /// Snapshot of every RID this transaction holds a lock on.
    pub fn locked_rids(&self) -> Vec<RID> {
        let mut rids: Vec<RID> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }

    pub fn shared_lock_count(&self) -> usize {
        self.shared_lock_set.lock().len()
    }

    pub fn exclusive_lock_count(&self) -> usize {
        self.exclusive_lock_set.lock().len()
    }
}
