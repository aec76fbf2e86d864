use crate::common::config::{TxnId, INVALID_TXN_ID};
use crate::common::rid::RID;
use crate::concurrency::transaction::{IsolationLevel, Transaction, TransactionState};
use crate::concurrency::transaction_manager::TransactionManager;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Row lock modes. Intention locks are out of scope: locking is flat over
/// RIDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A pending request parked in a RID's queue.
#[derive(Clone, Copy, Debug)]
struct LockRequest {
    txn_id: TxnId,
    lock_mode: LockMode,
}

impl LockRequest {
    fn new(txn_id: TxnId, lock_mode: LockMode) -> Self {
        Self { txn_id, lock_mode }
    }
}

/// Per-RID lock state: the current holders, the FIFO of waiting requests,
/// and the transaction currently upgrading shared to exclusive (if any).
struct QueueState {
    shared_lock_holders: HashSet<TxnId>,
    /// Transaction holding the exclusive lock, or `INVALID_TXN_ID`.
    exclusive_lock_holder: TxnId,
    request_queue: VecDeque<LockRequest>,
    /// Transaction with an upgrade in flight, or `INVALID_TXN_ID`.
    upgrading: TxnId,
}

impl QueueState {
    fn new() -> Self {
        Self {
            shared_lock_holders: HashSet::new(),
            exclusive_lock_holder: INVALID_TXN_ID,
            request_queue: VecDeque::new(),
            upgrading: INVALID_TXN_ID,
        }
    }

    /// A transaction holds the lock once it is the exclusive holder or a
    /// shared holder whose upgrade (if one was requested) has completed.
    fn is_lock_granted(&self, txn_id: TxnId) -> bool {
        self.exclusive_lock_holder == txn_id
            || (self.shared_lock_holders.contains(&txn_id) && self.upgrading != txn_id)
    }
}

/// Queue plus the condition variable blocked requesters wait on.
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            cv: Condvar::new(),
        }
    }
}

/// `LockManager` arbitrates row-level shared/exclusive locks under strict
/// two-phase locking. Deadlocks are prevented rather than detected:
/// wound-wait by transaction age, where an older transaction (smaller id)
/// aborts any younger holder or requester standing in its way, and a
/// younger transaction simply waits. A waiter is therefore always younger
/// than everything it waits on, so no waits-for cycle can form.
///
/// The table latch is only held to look up or create a RID's queue; all
/// blocking happens under the per-queue latch and condition variable.
pub struct LockManager {
    txn_manager: Arc<TransactionManager>,
    lock_table: Mutex<HashMap<RID, Arc<LockRequestQueue>>>,
}

impl LockManager {
    pub fn new(txn_manager: Arc<TransactionManager>) -> Self {
        Self {
            txn_manager,
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires a lock on the RID in shared mode. Blocks until granted;
    /// returns `false` if the transaction is (or becomes) aborted, or if
    /// the request is illegal under its isolation level.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: &RID) -> bool {
        if txn.get_state() == TransactionState::Aborted {
            return false;
        }
        // Shared locks are never legal under READ_UNCOMMITTED.
        if txn.get_isolation_level() == IsolationLevel::ReadUncommitted {
            Self::abort_current_transaction(txn);
            return false;
        }
        if txn.get_isolation_level() == IsolationLevel::RepeatableRead
            && txn.get_state() == TransactionState::Shrinking
        {
            Self::abort_current_transaction(txn);
            return false;
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return true;
        }

        let queue = self.get_queue(rid);
        let mut state = queue.state.lock();
        let txn_id = txn.get_txn_id();

        self.wound_younger_queued_requests(&mut state, txn_id);
        self.wound_younger_exclusive_holder(&mut state, txn_id);
        queue.cv.notify_all();

        if state.exclusive_lock_holder == INVALID_TXN_ID {
            state.shared_lock_holders.insert(txn_id);
        } else {
            state
                .request_queue
                .push_back(LockRequest::new(txn_id, LockMode::Shared));
            self.process_queue(&mut state);
            while txn.get_state() != TransactionState::Aborted && !state.is_lock_granted(txn_id) {
                queue.cv.wait(&mut state);
            }
        }

        if txn.get_state() == TransactionState::Aborted {
            return false;
        }

        txn.add_shared_lock(*rid);
        queue.cv.notify_all();
        true
    }

    /// Acquires a lock on the RID in exclusive mode. Re-entry on an
    /// already exclusively held RID succeeds immediately; re-entry on a
    /// shared RID upgrades instead.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: &RID) -> bool {
        if txn.get_state() == TransactionState::Aborted {
            return false;
        }
        if txn.get_state() == TransactionState::Shrinking {
            Self::abort_current_transaction(txn);
            return false;
        }
        if txn.is_exclusive_locked(rid) {
            return true;
        }
        if txn.is_shared_locked(rid) {
            return self.lock_upgrade(txn, rid);
        }

        let queue = self.get_queue(rid);
        let mut state = queue.state.lock();
        let txn_id = txn.get_txn_id();

        self.wound_younger_queued_requests(&mut state, txn_id);
        self.wound_younger_exclusive_holder(&mut state, txn_id);
        self.wound_younger_shared_holders(&mut state, txn_id);
        queue.cv.notify_all();

        if state.exclusive_lock_holder == INVALID_TXN_ID && state.shared_lock_holders.is_empty() {
            state.exclusive_lock_holder = txn_id;
        } else {
            state
                .request_queue
                .push_back(LockRequest::new(txn_id, LockMode::Exclusive));
            self.process_queue(&mut state);
            while txn.get_state() != TransactionState::Aborted && !state.is_lock_granted(txn_id) {
                queue.cv.wait(&mut state);
            }
        }

        if txn.get_state() == TransactionState::Aborted {
            return false;
        }

        txn.add_exclusive_lock(*rid);
        queue.cv.notify_all();
        true
    }

    /// Upgrades a shared lock to an exclusive one. Returns `false` when
    /// the transaction holds no shared lock on the RID; aborts the
    /// transaction when another upgrade is already pending on the queue.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: &RID) -> bool {
        if txn.get_state() == TransactionState::Aborted {
            return false;
        }
        if txn.get_state() == TransactionState::Shrinking {
            Self::abort_current_transaction(txn);
            return false;
        }
        if !txn.is_shared_locked(rid) {
            return false;
        }

        let queue = self.get_queue(rid);
        let mut state = queue.state.lock();
        let txn_id = txn.get_txn_id();

        if state.upgrading != INVALID_TXN_ID {
            // Only one upgrade may be in flight per queue.
            Self::abort_current_transaction(txn);
            return false;
        }

        self.wound_younger_queued_requests(&mut state, txn_id);
        queue.cv.notify_all();

        if state.exclusive_lock_holder == INVALID_TXN_ID
            && state.shared_lock_holders.len() == 1
            && state.shared_lock_holders.contains(&txn_id)
        {
            // Sole holder: promote in place.
            state.shared_lock_holders.clear();
            state.exclusive_lock_holder = txn_id;
        } else {
            state.upgrading = txn_id;
            self.process_queue(&mut state);
            while txn.get_state() != TransactionState::Aborted && !state.is_lock_granted(txn_id) {
                queue.cv.wait(&mut state);
            }
        }

        if txn.get_state() == TransactionState::Aborted {
            return false;
        }

        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(*rid);
        queue.cv.notify_all();
        true
    }

    /// Releases whatever lock the transaction holds on the RID and wakes
    /// the queue. Tolerant: returns `true` even when nothing was held,
    /// because the 2PL state transition below is itself an effect.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: &RID) -> bool {
        let queue = self.get_queue(rid);
        let mut state = queue.state.lock();
        let txn_id = txn.get_txn_id();

        if txn.get_isolation_level() == IsolationLevel::RepeatableRead
            && txn.get_state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }

        if state.exclusive_lock_holder == txn_id {
            state.exclusive_lock_holder = INVALID_TXN_ID;
        }
        state.shared_lock_holders.remove(&txn_id);
        if state.upgrading == txn_id {
            state.upgrading = INVALID_TXN_ID;
        }
        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);

        self.process_queue(&mut state);
        queue.cv.notify_all();
        true
    }

    /// Looks up or creates the RID's queue under the short table latch.
    fn get_queue(&self, rid: &RID) -> Arc<LockRequestQueue> {
        let mut lock_table = self.lock_table.lock();
        Arc::clone(lock_table.entry(*rid).or_default())
    }

    fn abort_current_transaction(txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
    }

    /// Marks the victim aborted through the transaction manager. The
    /// victim observes its own state on wakeup and exits its wait loop.
    fn wound(&self, victim_id: TxnId) {
        debug!("wounding txn {}", victim_id);
        if let Some(victim) = self.txn_manager.get_transaction(victim_id) {
            victim.set_state(TransactionState::Aborted);
        }
    }

    /// An arriving request wounds every younger request already queued,
    /// regardless of mode.
    fn wound_younger_queued_requests(&self, state: &mut QueueState, requester_id: TxnId) {
        let victims: Vec<TxnId> = state
            .request_queue
            .iter()
            .filter(|req| req.txn_id > requester_id)
            .map(|req| req.txn_id)
            .collect();
        for victim in victims {
            if state.upgrading == victim {
                state.upgrading = INVALID_TXN_ID;
            }
            self.wound(victim);
        }
        state.request_queue.retain(|req| req.txn_id <= requester_id);
    }

    /// Wounds the exclusive holder if it is younger than the requester.
    fn wound_younger_exclusive_holder(&self, state: &mut QueueState, requester_id: TxnId) {
        if state.exclusive_lock_holder != INVALID_TXN_ID
            && requester_id < state.exclusive_lock_holder
        {
            self.wound(state.exclusive_lock_holder);
            state.exclusive_lock_holder = INVALID_TXN_ID;
        }
    }

    /// Wounds every shared holder younger than the requester.
    fn wound_younger_shared_holders(&self, state: &mut QueueState, requester_id: TxnId) {
        let victims: Vec<TxnId> = state
            .shared_lock_holders
            .iter()
            .copied()
            .filter(|&holder| holder > requester_id)
            .collect();
        for victim in victims {
            state.shared_lock_holders.remove(&victim);
            if state.upgrading == victim {
                state.upgrading = INVALID_TXN_ID;
            }
            self.wound(victim);
        }
    }

    /// Grant pass over the queue, run after every state change.
    ///
    /// A pending upgrade suspends FIFO processing: it resolves as soon as
    /// the upgrader is the oldest shared holder (wounding the younger
    /// ones), and nothing else is granted until then. Otherwise requests
    /// are granted strictly from the front; the pass stops at the first
    /// request that cannot be satisfied.
    fn process_queue(&self, state: &mut QueueState) {
        if state.upgrading != INVALID_TXN_ID {
            let upgrader = state.upgrading;
            if state
                .shared_lock_holders
                .iter()
                .all(|&holder| upgrader <= holder)
            {
                let victims: Vec<TxnId> = state
                    .shared_lock_holders
                    .iter()
                    .copied()
                    .filter(|&holder| holder != upgrader)
                    .collect();
                for victim in victims {
                    self.wound(victim);
                }
                state.shared_lock_holders.clear();
                state.exclusive_lock_holder = upgrader;
                state.upgrading = INVALID_TXN_ID;
            }
            return;
        }

        while let Some(front) = state.request_queue.front().copied() {
            match front.lock_mode {
                LockMode::Shared => {
                    if state.exclusive_lock_holder == INVALID_TXN_ID {
                        state.shared_lock_holders.insert(front.txn_id);
                        state.request_queue.pop_front();
                    } else if state.exclusive_lock_holder > front.txn_id {
                        // The younger exclusive holder loses to the waiter.
                        self.wound(state.exclusive_lock_holder);
                        state.exclusive_lock_holder = INVALID_TXN_ID;
                        state.shared_lock_holders.insert(front.txn_id);
                        state.request_queue.pop_front();
                    } else {
                        break;
                    }
                }
                LockMode::Exclusive => {
                    if state.exclusive_lock_holder != INVALID_TXN_ID {
                        if state.exclusive_lock_holder > front.txn_id {
                            self.wound(state.exclusive_lock_holder);
                            state.exclusive_lock_holder = front.txn_id;
                            state.request_queue.pop_front();
                        }
                        break;
                    }
                    self.wound_younger_shared_holders(state, front.txn_id);
                    if state.shared_lock_holders.is_empty() {
                        state.exclusive_lock_holder = front.txn_id;
                        state.request_queue.pop_front();
                    }
                    break;
                }
            }
        }
    }

    /// Test hook: reports `(shared holders, exclusive holder)` for a RID.
    #[cfg(test)]
    fn holders(&self, rid: &RID) -> (Vec<TxnId>, TxnId) {
        let queue = self.get_queue(rid);
        let state = queue.state.lock();
        let mut shared: Vec<TxnId> = state.shared_lock_holders.iter().copied().collect();
        shared.sort_unstable();
        (shared, state.exclusive_lock_holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<TransactionManager>, LockManager) {
        let txn_manager = Arc::new(TransactionManager::new());
        let lock_manager = LockManager::new(Arc::clone(&txn_manager));
        (txn_manager, lock_manager)
    }

    #[test]
    fn test_shared_lock_basic() {
        let (txn_manager, lock_manager) = setup();
        let t0 = txn_manager.begin(IsolationLevel::RepeatableRead);
        let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = RID::new(0, 0);

        assert!(lock_manager.lock_shared(&t0, &rid));
        assert!(lock_manager.lock_shared(&t1, &rid));
        assert!(t0.is_shared_locked(&rid));
        assert!(t1.is_shared_locked(&rid));
        assert_eq!(
            lock_manager.holders(&rid),
            (vec![t0.get_txn_id(), t1.get_txn_id()], INVALID_TXN_ID)
        );

        // Re-entry is a no-op success.
        assert!(lock_manager.lock_shared(&t0, &rid));
    }

    #[test]
    fn test_shared_lock_illegal_under_read_uncommitted() {
        let (txn_manager, lock_manager) = setup();
        let txn = txn_manager.begin(IsolationLevel::ReadUncommitted);
        let rid = RID::new(0, 0);

        assert!(!lock_manager.lock_shared(&txn, &rid));
        assert_eq!(txn.get_state(), TransactionState::Aborted);
        assert_eq!(txn.shared_lock_count(), 0);
    }

    #[test]
    fn test_shared_lock_on_shrinking_repeatable_read() {
        let (txn_manager, lock_manager) = setup();
        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
        txn.set_state(TransactionState::Shrinking);
        let rid = RID::new(0, 0);

        assert!(!lock_manager.lock_shared(&txn, &rid));
        assert_eq!(txn.get_state(), TransactionState::Aborted);
        assert_eq!(txn.shared_lock_count(), 0);
    }

    #[test]
    fn test_shared_lock_on_shrinking_read_committed_allowed() {
        let (txn_manager, lock_manager) = setup();
        let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
        txn.set_state(TransactionState::Shrinking);
        let rid = RID::new(0, 0);

        assert!(lock_manager.lock_shared(&txn, &rid));
        assert!(txn.is_shared_locked(&rid));
    }

    #[test]
    fn test_exclusive_lock_on_shrinking_aborts() {
        let (txn_manager, lock_manager) = setup();
        let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
        txn.set_state(TransactionState::Shrinking);
        let rid = RID::new(0, 0);

        assert!(!lock_manager.lock_exclusive(&txn, &rid));
        assert_eq!(txn.get_state(), TransactionState::Aborted);
    }

    #[test]
    fn test_older_exclusive_wounds_younger_holder() {
        let (txn_manager, lock_manager) = setup();
        let older = txn_manager.begin(IsolationLevel::RepeatableRead);
        let younger = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = RID::new(0, 0);

        assert!(lock_manager.lock_exclusive(&younger, &rid));

        // The older transaction preempts the younger holder on contact.
        assert!(lock_manager.lock_exclusive(&older, &rid));
        assert_eq!(younger.get_state(), TransactionState::Aborted);
        assert_eq!(lock_manager.holders(&rid).1, older.get_txn_id());
    }

    #[test]
    fn test_older_exclusive_wounds_younger_shared_holders() {
        let (txn_manager, lock_manager) = setup();
        let older = txn_manager.begin(IsolationLevel::RepeatableRead);
        let younger1 = txn_manager.begin(IsolationLevel::RepeatableRead);
        let younger2 = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = RID::new(0, 0);

        assert!(lock_manager.lock_shared(&younger1, &rid));
        assert!(lock_manager.lock_shared(&younger2, &rid));

        assert!(lock_manager.lock_exclusive(&older, &rid));
        assert_eq!(younger1.get_state(), TransactionState::Aborted);
        assert_eq!(younger2.get_state(), TransactionState::Aborted);
    }

    #[test]
    fn test_older_shared_wounds_younger_exclusive_holder() {
        let (txn_manager, lock_manager) = setup();
        let older = txn_manager.begin(IsolationLevel::RepeatableRead);
        let younger = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = RID::new(0, 0);

        assert!(lock_manager.lock_exclusive(&younger, &rid));
        assert!(lock_manager.lock_shared(&older, &rid));
        assert_eq!(younger.get_state(), TransactionState::Aborted);
        assert!(older.is_shared_locked(&rid));
    }

    #[test]
    fn test_upgrade_requires_shared_lock() {
        let (txn_manager, lock_manager) = setup();
        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = RID::new(0, 0);

        assert!(!lock_manager.lock_upgrade(&txn, &rid));
        // Missing prerequisite is a plain refusal, not an abort.
        assert_eq!(txn.get_state(), TransactionState::Growing);
    }

    #[test]
    fn test_upgrade_sole_holder() {
        let (txn_manager, lock_manager) = setup();
        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = RID::new(0, 0);

        assert!(lock_manager.lock_shared(&txn, &rid));
        assert!(lock_manager.lock_upgrade(&txn, &rid));
        assert!(!txn.is_shared_locked(&rid));
        assert!(txn.is_exclusive_locked(&rid));
        assert_eq!(lock_manager.holders(&rid).1, txn.get_txn_id());
    }

    #[test]
    fn test_exclusive_reentry_on_shared_upgrades() {
        let (txn_manager, lock_manager) = setup();
        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = RID::new(0, 0);

        assert!(lock_manager.lock_shared(&txn, &rid));
        assert!(lock_manager.lock_exclusive(&txn, &rid));
        assert!(txn.is_exclusive_locked(&rid));
        // And exclusive re-entry stays a success.
        assert!(lock_manager.lock_exclusive(&txn, &rid));
    }

    #[test]
    fn test_older_upgrader_wounds_younger_shared_holders() {
        let (txn_manager, lock_manager) = setup();
        let older = txn_manager.begin(IsolationLevel::RepeatableRead);
        let younger = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = RID::new(0, 0);

        assert!(lock_manager.lock_shared(&older, &rid));
        assert!(lock_manager.lock_shared(&younger, &rid));

        assert!(lock_manager.lock_upgrade(&older, &rid));
        assert_eq!(younger.get_state(), TransactionState::Aborted);
        assert_eq!(lock_manager.holders(&rid).1, older.get_txn_id());
    }

    #[test]
    fn test_unlock_is_tolerant() {
        let (txn_manager, lock_manager) = setup();
        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = RID::new(0, 0);

        assert!(lock_manager.unlock(&txn, &rid));
        // The 2PL transition fired even though nothing was held.
        assert_eq!(txn.get_state(), TransactionState::Shrinking);
    }

    #[test]
    fn test_unlock_transitions_repeatable_read_to_shrinking() {
        let (txn_manager, lock_manager) = setup();
        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
        let rid = RID::new(0, 0);

        assert!(lock_manager.lock_shared(&txn, &rid));
        assert!(lock_manager.unlock(&txn, &rid));
        assert_eq!(txn.get_state(), TransactionState::Shrinking);
        assert!(!txn.is_shared_locked(&rid));

        // READ_COMMITTED keeps growing across unlocks.
        let rc = txn_manager.begin(IsolationLevel::ReadCommitted);
        assert!(lock_manager.lock_shared(&rc, &rid));
        assert!(lock_manager.unlock(&rc, &rid));
        assert_eq!(rc.get_state(), TransactionState::Growing);
    }

    #[test]
    fn test_aborted_transaction_cannot_lock() {
        let (txn_manager, lock_manager) = setup();
        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
        txn.set_state(TransactionState::Aborted);
        let rid = RID::new(0, 0);

        assert!(!lock_manager.lock_shared(&txn, &rid));
        assert!(!lock_manager.lock_exclusive(&txn, &rid));
        assert!(!lock_manager.lock_upgrade(&txn, &rid));
    }
}
