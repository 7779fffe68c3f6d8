use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::common::{AbortReason, RecordId, Result, StrataError, TableId, TxnId};

use super::transaction::{IsolationLevel, Transaction, TransactionState};

/// Hierarchical lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    requests: VecDeque<LockRequest>,
    /// Transaction currently upgrading its lock; at most one per queue.
    upgrading: Option<TxnId>,
}

/// One FIFO request queue per lockable resource, with a condition
/// variable for waiters.
#[derive(Default)]
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

struct LockManagerState {
    table_locks: Mutex<HashMap<TableId, Arc<LockRequestQueue>>>,
    row_locks: Mutex<HashMap<RecordId, Arc<LockRequestQueue>>>,
    /// Live transactions, so the detector can abort a victim by id.
    txns: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

/// Table- and row-granular lock manager with FIFO grant order, lock
/// upgrades, isolation-level gates, and a background wait-for-graph
/// deadlock detector that aborts the youngest transaction of a cycle.
pub struct LockManager {
    state: Arc<LockManagerState>,
    shutdown: Arc<AtomicBool>,
    detector: Option<JoinHandle<()>>,
}

impl LockManager {
    /// Creates the lock manager and starts the deadlock detector with the
    /// given wake interval.
    pub fn new(detection_interval: Duration) -> Self {
        let state = Arc::new(LockManagerState {
            table_locks: Mutex::new(HashMap::new()),
            row_locks: Mutex::new(HashMap::new()),
            txns: Mutex::new(HashMap::new()),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let detector_state = Arc::clone(&state);
        let detector_stop = Arc::clone(&shutdown);
        let detector = thread::spawn(move || {
            while !detector_stop.load(Ordering::Relaxed) {
                thread::sleep(detection_interval);
                if detector_stop.load(Ordering::Relaxed) {
                    break;
                }
                Self::run_cycle_detection(&detector_state);
            }
        });

        Self {
            state,
            shutdown,
            detector: Some(detector),
        }
    }

    /// Acquires (or upgrades to) `mode` on the table, blocking until the
    /// request is compatible with every earlier one in the queue.
    pub fn lock_table(&self, txn: &Arc<Transaction>, mode: LockMode, oid: TableId) -> Result<()> {
        self.register(txn);
        self.check_isolation_gates(txn, mode)?;

        let queue = {
            let mut tables = self.state.table_locks.lock();
            Arc::clone(tables.entry(oid).or_default())
        };
        let mut state = queue.state.lock();

        // Upgrade path: the transaction already has a request in the queue.
        if let Some(position) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id())
        {
            let held = state.requests[position].mode;
            if held == mode {
                return Ok(());
            }
            if state.upgrading.is_some() {
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !Self::upgrade_allowed(held, mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }

            state.requests.remove(position);
            txn.remove_table_lock(held, oid);

            // The upgraded request goes ahead of every waiter.
            let insert_at = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                insert_at,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
            state.upgrading = Some(txn.id());

            loop {
                if Self::grantable(&state, txn.id()) {
                    break;
                }
                queue.cv.wait(&mut state);
                if txn.state() == TransactionState::Aborted {
                    if state.upgrading == Some(txn.id()) {
                        state.upgrading = None;
                    }
                    state.requests.retain(|r| r.txn_id != txn.id());
                    drop(state);
                    queue.cv.notify_all();
                    return Err(StrataError::TransactionAbort {
                        txn_id: txn.id(),
                        reason: AbortReason::Deadlock,
                    });
                }
            }

            state.upgrading = None;
            Self::mark_granted(&mut state, txn.id());
            txn.record_table_lock(mode, oid);
            drop(state);
            if mode != LockMode::Exclusive {
                queue.cv.notify_all();
            }
            return Ok(());
        }

        state.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        loop {
            if Self::grantable(&state, txn.id()) {
                break;
            }
            queue.cv.wait(&mut state);
            if txn.state() == TransactionState::Aborted {
                state.requests.retain(|r| r.txn_id != txn.id());
                drop(state);
                queue.cv.notify_all();
                return Err(StrataError::TransactionAbort {
                    txn_id: txn.id(),
                    reason: AbortReason::Deadlock,
                });
            }
        }

        Self::mark_granted(&mut state, txn.id());
        txn.record_table_lock(mode, oid);
        drop(state);
        if mode != LockMode::Exclusive {
            queue.cv.notify_all();
        }
        Ok(())
    }

    /// Releases the table lock, transitioning GROWING to SHRINKING where
    /// the isolation level requires it. Row locks under the table must be
    /// released first.
    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableId) -> Result<()> {
        let queue = {
            let tables = self.state.table_locks.lock();
            match tables.get(&oid) {
                Some(queue) => Arc::clone(queue),
                None => {
                    return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
                }
            }
        };

        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let mut state = queue.state.lock();
        let Some(position) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let mode = state.requests[position].mode;
        state.requests.remove(position);
        drop(state);
        queue.cv.notify_all();

        self.apply_shrinking_transition(txn, mode);
        txn.remove_table_lock(mode, oid);
        Ok(())
    }

    /// Acquires (or upgrades to) `mode` on a row. Intention modes are
    /// illegal on rows, and an exclusive row lock requires an exclusive
    /// intent (X, IX, or SIX) already held on the table.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableId,
        rid: RecordId,
    ) -> Result<()> {
        self.register(txn);

        if matches!(
            mode,
            LockMode::IntentionShared | LockMode::IntentionExclusive | LockMode::SharedIntentionExclusive
        ) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        self.check_isolation_gates(txn, mode)?;

        if mode == LockMode::Exclusive
            && !txn.is_table_exclusive_locked(oid)
            && !txn.is_table_intention_exclusive_locked(oid)
            && !txn.is_table_shared_intention_exclusive_locked(oid)
        {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }

        let queue = {
            let mut rows = self.state.row_locks.lock();
            Arc::clone(rows.entry(rid).or_default())
        };
        let mut state = queue.state.lock();

        if let Some(position) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id())
        {
            let held = state.requests[position].mode;
            if held == mode {
                return Ok(());
            }
            if state.upgrading.is_some() {
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !Self::upgrade_allowed(held, mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }

            state.requests.remove(position);
            txn.remove_row_lock(held, oid, rid);

            let insert_at = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                insert_at,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
            state.upgrading = Some(txn.id());

            loop {
                if Self::grantable(&state, txn.id()) {
                    break;
                }
                queue.cv.wait(&mut state);
                if txn.state() == TransactionState::Aborted {
                    if state.upgrading == Some(txn.id()) {
                        state.upgrading = None;
                    }
                    state.requests.retain(|r| r.txn_id != txn.id());
                    drop(state);
                    queue.cv.notify_all();
                    return Err(StrataError::TransactionAbort {
                        txn_id: txn.id(),
                        reason: AbortReason::Deadlock,
                    });
                }
            }

            state.upgrading = None;
            Self::mark_granted(&mut state, txn.id());
            txn.record_row_lock(mode, oid, rid);
            drop(state);
            if mode != LockMode::Exclusive {
                queue.cv.notify_all();
            }
            return Ok(());
        }

        state.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        loop {
            if Self::grantable(&state, txn.id()) {
                break;
            }
            queue.cv.wait(&mut state);
            if txn.state() == TransactionState::Aborted {
                state.requests.retain(|r| r.txn_id != txn.id());
                drop(state);
                queue.cv.notify_all();
                return Err(StrataError::TransactionAbort {
                    txn_id: txn.id(),
                    reason: AbortReason::Deadlock,
                });
            }
        }

        Self::mark_granted(&mut state, txn.id());
        txn.record_row_lock(mode, oid, rid);
        drop(state);
        if mode != LockMode::Exclusive {
            queue.cv.notify_all();
        }
        Ok(())
    }

    /// Releases a row lock.
    pub fn unlock_row(&self, txn: &Arc<Transaction>, oid: TableId, rid: RecordId) -> Result<()> {
        let queue = {
            let rows = self.state.row_locks.lock();
            match rows.get(&rid) {
                Some(queue) => Arc::clone(queue),
                None => {
                    return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
                }
            }
        };

        let mut state = queue.state.lock();
        let Some(position) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            drop(state);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let mode = state.requests[position].mode;
        state.requests.remove(position);
        drop(state);
        queue.cv.notify_all();

        self.apply_shrinking_transition(txn, mode);
        txn.remove_row_lock(mode, oid, rid);
        Ok(())
    }

    /// Removes every lock (and request bookkeeping) the transaction holds,
    /// waking each affected queue. Used by commit and abort; performs no
    /// state transitions.
    pub fn release_all(&self, txn: &Transaction) {
        let queues: Vec<Arc<LockRequestQueue>> = {
            let tables = self.state.table_locks.lock();
            tables.values().cloned().collect()
        };
        for queue in queues {
            Self::drop_granted_requests(&queue, txn.id());
        }

        let queues: Vec<Arc<LockRequestQueue>> = {
            let rows = self.state.row_locks.lock();
            rows.values().cloned().collect()
        };
        for queue in queues {
            Self::drop_granted_requests(&queue, txn.id());
        }

        txn.clear_lock_sets();
        self.state.txns.lock().remove(&txn.id());
    }

    fn drop_granted_requests(queue: &LockRequestQueue, txn_id: TxnId) {
        let mut state = queue.state.lock();
        let involved = state.requests.iter().any(|r| r.txn_id == txn_id);
        // Pending requests stay: their waiter observes the terminal state
        // on wake-up and removes itself.
        state.requests.retain(|r| r.txn_id != txn_id || !r.granted);
        drop(state);
        if involved {
            queue.cv.notify_all();
        }
    }

    /// Whether two already-granted/requested modes may coexist.
    pub fn compatible(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        match (held, requested) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (IntentionExclusive, _) | (_, IntentionExclusive) => false,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Legal upgrade transitions: IS -> {S, X, IX, SIX}; S -> {X, SIX};
    /// IX -> {X, SIX}; SIX -> X.
    fn upgrade_allowed(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (held, requested),
            (IntentionShared, Shared)
                | (IntentionShared, Exclusive)
                | (IntentionShared, IntentionExclusive)
                | (IntentionShared, SharedIntentionExclusive)
                | (Shared, Exclusive)
                | (Shared, SharedIntentionExclusive)
                | (IntentionExclusive, Exclusive)
                | (IntentionExclusive, SharedIntentionExclusive)
                | (SharedIntentionExclusive, Exclusive)
        )
    }

    /// FIFO grant check: the request is grantable iff it is compatible
    /// with every granted request and is the first ungranted one.
    fn grantable(state: &QueueState, txn_id: TxnId) -> bool {
        let Some(mode) = state
            .requests
            .iter()
            .find(|r| r.txn_id == txn_id && !r.granted)
            .map(|r| r.mode)
        else {
            return false;
        };

        for request in &state.requests {
            if request.granted {
                if !Self::compatible(request.mode, mode) {
                    return false;
                }
            } else {
                return request.txn_id == txn_id;
            }
        }
        false
    }

    fn mark_granted(state: &mut QueueState, txn_id: TxnId) {
        if let Some(request) = state
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id && !r.granted)
        {
            request.granted = true;
        }
    }

    /// Isolation-level admission rules shared by table and row paths.
    fn check_isolation_gates(&self, txn: &Arc<Transaction>, mode: LockMode) -> Result<()> {
        use LockMode::*;
        let shrinking = txn.state() == TransactionState::Shrinking;
        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                if matches!(mode, Shared | IntentionShared | SharedIntentionExclusive) {
                    return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if shrinking && matches!(mode, Exclusive | IntentionExclusive) {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if shrinking && !matches!(mode, IntentionShared | Shared) {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::RepeatableRead => {
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// GROWING -> SHRINKING on releasing S or X under REPEATABLE_READ, or
    /// X under the other levels.
    fn apply_shrinking_transition(&self, txn: &Arc<Transaction>, released: LockMode) {
        let transitions = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(released, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                released == LockMode::Exclusive
            }
        };
        if transitions
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn abort(&self, txn: &Arc<Transaction>, reason: AbortReason) -> StrataError {
        txn.set_state(TransactionState::Aborted);
        StrataError::TransactionAbort {
            txn_id: txn.id(),
            reason,
        }
    }

    fn register(&self, txn: &Arc<Transaction>) {
        self.state
            .txns
            .lock()
            .entry(txn.id())
            .or_insert_with(|| Arc::clone(txn));
    }

    /// One detector pass: rebuild the wait-for graph, abort the youngest
    /// member of every cycle, and wake the queues the victim waits on.
    fn run_cycle_detection(state: &LockManagerState) {
        loop {
            let (edges, waiter_queues) = Self::build_wait_for_graph(state);
            let Some(victim) = Self::find_cycle_victim(&edges) else {
                break;
            };

            warn!(txn = %victim, "deadlock detected, aborting youngest transaction");
            if let Some(txn) = state.txns.lock().get(&victim).cloned() {
                txn.set_state(TransactionState::Aborted);
            }

            if let Some(queues) = waiter_queues.get(&victim) {
                for queue in queues {
                    // Take the queue mutex so a waiter between its check
                    // and its wait cannot miss the notification.
                    drop(queue.state.lock());
                    queue.cv.notify_all();
                }
            }
        }
    }

    /// Edge list: each ungranted request waits for every granted request
    /// in the same queue.
    #[allow(clippy::type_complexity)]
    fn build_wait_for_graph(
        state: &LockManagerState,
    ) -> (
        BTreeMap<TxnId, BTreeSet<TxnId>>,
        HashMap<TxnId, Vec<Arc<LockRequestQueue>>>,
    ) {
        let mut edges: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let mut waiter_queues: HashMap<TxnId, Vec<Arc<LockRequestQueue>>> = HashMap::new();

        let mut queues: Vec<Arc<LockRequestQueue>> = {
            let tables = state.table_locks.lock();
            tables.values().cloned().collect()
        };
        {
            let rows = state.row_locks.lock();
            queues.extend(rows.values().cloned());
        }

        // Waiters that are already aborted are on their way out of the
        // queue; including them would re-detect the same cycle forever.
        let aborted: BTreeSet<TxnId> = {
            let txns = state.txns.lock();
            txns.iter()
                .filter(|(_, t)| t.state() == TransactionState::Aborted)
                .map(|(&id, _)| id)
                .collect()
        };

        for queue in queues {
            let qstate = queue.state.lock();
            let granted: Vec<TxnId> = qstate
                .requests
                .iter()
                .filter(|r| r.granted)
                .map(|r| r.txn_id)
                .collect();
            for request in qstate
                .requests
                .iter()
                .filter(|r| !r.granted && !aborted.contains(&r.txn_id))
            {
                let entry = edges.entry(request.txn_id).or_default();
                for &holder in &granted {
                    if holder != request.txn_id {
                        entry.insert(holder);
                    }
                }
                waiter_queues
                    .entry(request.txn_id)
                    .or_default()
                    .push(Arc::clone(&queue));
            }
        }

        (edges, waiter_queues)
    }

    /// DFS in ascending id order; on the first cycle found, returns its
    /// largest member (youngest-wins victim selection).
    fn find_cycle_victim(edges: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
        fn dfs(
            node: TxnId,
            edges: &BTreeMap<TxnId, BTreeSet<TxnId>>,
            visited: &mut BTreeSet<TxnId>,
            path: &mut Vec<TxnId>,
        ) -> Option<Vec<TxnId>> {
            visited.insert(node);
            path.push(node);

            if let Some(neighbors) = edges.get(&node) {
                for &next in neighbors {
                    if let Some(start) = path.iter().position(|&p| p == next) {
                        return Some(path[start..].to_vec());
                    }
                    if !visited.contains(&next) {
                        if let Some(cycle) = dfs(next, edges, visited, path) {
                            return Some(cycle);
                        }
                    }
                }
            }

            path.pop();
            None
        }

        let mut visited = BTreeSet::new();
        for &start in edges.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut path = Vec::new();
            if let Some(cycle) = dfs(start, edges, &mut visited, &mut path) {
                return cycle.into_iter().max();
            }
        }
        None
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(detector) = self.detector.take() {
            let _ = detector.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PageId, SlotId};

    fn lm() -> LockManager {
        LockManager::new(Duration::from_millis(10))
    }

    fn txn(id: u32, level: IsolationLevel) -> Arc<Transaction> {
        Arc::new(Transaction::new(TxnId::new(id), level))
    }

    fn rid(n: u32) -> RecordId {
        RecordId::new(PageId::new(n), SlotId::new(0))
    }

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        let table = [
            (IntentionShared, IntentionShared, true),
            (IntentionShared, IntentionExclusive, true),
            (IntentionShared, Shared, true),
            (IntentionShared, SharedIntentionExclusive, true),
            (IntentionShared, Exclusive, false),
            (IntentionExclusive, IntentionExclusive, true),
            (IntentionExclusive, Shared, false),
            (IntentionExclusive, SharedIntentionExclusive, false),
            (IntentionExclusive, Exclusive, false),
            (Shared, Shared, true),
            (Shared, SharedIntentionExclusive, false),
            (Shared, Exclusive, false),
            (SharedIntentionExclusive, SharedIntentionExclusive, false),
            (SharedIntentionExclusive, Exclusive, false),
            (Exclusive, Exclusive, false),
        ];
        for (a, b, expect) in table {
            assert_eq!(LockManager::compatible(a, b), expect, "{a:?} vs {b:?}");
            assert_eq!(LockManager::compatible(b, a), expect, "{b:?} vs {a:?}");
        }
    }

    #[test]
    fn test_shared_locks_coexist() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        lm.lock_table(&t1, LockMode::Shared, 1).unwrap();
        lm.lock_table(&t2, LockMode::Shared, 1).unwrap();
        assert!(t1.is_table_shared_locked(1));
        assert!(t2.is_table_shared_locked(1));

        lm.unlock_table(&t1, 1).unwrap();
        lm.unlock_table(&t2, 1).unwrap();
    }

    #[test]
    fn test_upgrade_is_to_x() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        lm.lock_table(&t1, LockMode::IntentionShared, 1).unwrap();
        lm.lock_table(&t1, LockMode::Exclusive, 1).unwrap();

        assert!(!t1.is_table_intention_shared_locked(1));
        assert!(t1.is_table_exclusive_locked(1));

        // Exactly one granted request of mode X remains.
        let queue = {
            let tables = lm.state.table_locks.lock();
            Arc::clone(tables.get(&1).unwrap())
        };
        let state = queue.state.lock();
        assert_eq!(state.requests.len(), 1);
        assert!(state.requests[0].granted);
        assert_eq!(state.requests[0].mode, LockMode::Exclusive);
    }

    #[test]
    fn test_illegal_upgrade_aborts() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        lm.lock_table(&t1, LockMode::Exclusive, 1).unwrap();
        let err = lm.lock_table(&t1, LockMode::Shared, 1).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::IncompatibleUpgrade));
        assert_eq!(t1.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_read_uncommitted_rejects_shared() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::ReadUncommitted);

        let err = lm.lock_table(&t1, LockMode::Shared, 1).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::LockSharedOnReadUncommitted)
        );
    }

    #[test]
    fn test_lock_on_shrinking_aborts() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        lm.lock_table(&t1, LockMode::Shared, 1).unwrap();
        lm.unlock_table(&t1, 1).unwrap();
        assert_eq!(t1.state(), TransactionState::Shrinking);

        let err = lm.lock_table(&t1, LockMode::Shared, 2).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));
    }

    #[test]
    fn test_read_committed_shared_release_keeps_growing() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::ReadCommitted);

        lm.lock_table(&t1, LockMode::IntentionShared, 1).unwrap();
        lm.unlock_table(&t1, 1).unwrap();
        assert_eq!(t1.state(), TransactionState::Growing);
    }

    #[test]
    fn test_row_lock_requires_table_intent() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        let err = lm
            .lock_row(&t1, LockMode::Exclusive, 1, rid(1))
            .unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::TableLockNotPresent));
    }

    #[test]
    fn test_intention_lock_on_row_rejected() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        let err = lm
            .lock_row(&t1, LockMode::IntentionShared, 1, rid(1))
            .unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::AttemptedIntentionLockOnRow)
        );
    }

    #[test]
    fn test_unlock_table_with_row_locks_aborts() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        lm.lock_table(&t1, LockMode::IntentionExclusive, 1).unwrap();
        lm.lock_row(&t1, LockMode::Exclusive, 1, rid(1)).unwrap();

        let err = lm.unlock_table(&t1, 1).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::TableUnlockedBeforeUnlockingRows)
        );
    }

    #[test]
    fn test_unlock_without_lock_aborts() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        let err = lm.unlock_table(&t1, 42).unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::AttemptedUnlockButNoLockHeld)
        );
    }

    #[test]
    fn test_blocking_grant_fifo() {
        let lm = Arc::new(lm());
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        lm.lock_table(&t1, LockMode::Exclusive, 1).unwrap();

        let lm2 = Arc::clone(&lm);
        let t2c = Arc::clone(&t2);
        let waiter = std::thread::spawn(move || lm2.lock_table(&t2c, LockMode::Exclusive, 1));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished(), "t2 must block behind t1's X lock");

        lm.unlock_table(&t1, 1).unwrap();
        waiter.join().unwrap().unwrap();
        assert!(t2.is_table_exclusive_locked(1));
    }

    #[test]
    fn test_concurrent_upgrade_conflict() {
        let lm = Arc::new(lm());
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);
        let t3 = txn(3, IsolationLevel::RepeatableRead);

        lm.lock_table(&t1, LockMode::Shared, 1).unwrap();
        lm.lock_table(&t2, LockMode::Shared, 1).unwrap();
        lm.lock_table(&t3, LockMode::Shared, 1).unwrap();

        // t2's upgrade blocks behind t1's and t3's shared locks.
        let lm2 = Arc::clone(&lm);
        let t2c = Arc::clone(&t2);
        let upgrader = std::thread::spawn(move || lm2.lock_table(&t2c, LockMode::Exclusive, 1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!upgrader.is_finished());

        // A second concurrent upgrade must abort.
        let err = lm.lock_table(&t3, LockMode::Exclusive, 1).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::UpgradeConflict));

        // Releasing the other shared locks lets the first upgrade finish.
        lm.release_all(&t3);
        lm.unlock_table(&t1, 1).unwrap();
        upgrader.join().unwrap().unwrap();
        assert!(t2.is_table_exclusive_locked(1));
    }

    #[test]
    fn test_deadlock_detection_aborts_youngest() {
        let lm = Arc::new(lm());
        let t1 = txn(1, IsolationLevel::RepeatableRead);
        let t2 = txn(2, IsolationLevel::RepeatableRead);

        lm.lock_table(&t1, LockMode::IntentionExclusive, 1).unwrap();
        lm.lock_table(&t2, LockMode::IntentionExclusive, 1).unwrap();
        lm.lock_row(&t1, LockMode::Exclusive, 1, rid(1)).unwrap();
        lm.lock_row(&t2, LockMode::Exclusive, 1, rid(2)).unwrap();

        // t1 waits for r2, t2 waits for r1: a cycle.
        let lm1 = Arc::clone(&lm);
        let t1c = Arc::clone(&t1);
        let h1 = std::thread::spawn(move || lm1.lock_row(&t1c, LockMode::Exclusive, 1, rid(2)));

        std::thread::sleep(Duration::from_millis(20));

        let lm2 = Arc::clone(&lm);
        let t2c = Arc::clone(&t2);
        let h2 = std::thread::spawn(move || lm2.lock_row(&t2c, LockMode::Exclusive, 1, rid(1)));

        // The detector must abort t2 (largest id) and wake both waiters.
        let r2 = h2.join().unwrap();
        assert_eq!(
            r2.unwrap_err().abort_reason(),
            Some(AbortReason::Deadlock)
        );
        assert_eq!(t2.state(), TransactionState::Aborted);

        // t2's waiter removed itself; releasing t2's locks unblocks t1.
        lm.release_all(&t2);
        h1.join().unwrap().unwrap();
        assert_eq!(t1.state(), TransactionState::Growing);
    }

    #[test]
    fn test_release_all_clears_queues() {
        let lm = lm();
        let t1 = txn(1, IsolationLevel::RepeatableRead);

        lm.lock_table(&t1, LockMode::IntentionExclusive, 1).unwrap();
        lm.lock_row(&t1, LockMode::Exclusive, 1, rid(1)).unwrap();

        lm.release_all(&t1);
        assert!(!t1.holds_row_locks_on(1));
        assert!(!t1.is_table_intention_exclusive_locked(1));

        // The queues are empty, so a fresh transaction locks immediately.
        let t2 = txn(2, IsolationLevel::RepeatableRead);
        lm.lock_table(&t2, LockMode::Exclusive, 1).unwrap();
    }
}
