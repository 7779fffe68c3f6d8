use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::common::{RecordId, TableId, TxnId};

use super::lock_manager::LockMode;

/// Two-phase locking isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction lifecycle states. GROWING transitions to SHRINKING at the
/// first lock release that the isolation level treats as phase-ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Default)]
struct LockSets {
    shared_tables: HashSet<TableId>,
    exclusive_tables: HashSet<TableId>,
    intention_shared_tables: HashSet<TableId>,
    intention_exclusive_tables: HashSet<TableId>,
    shared_intention_exclusive_tables: HashSet<TableId>,
    shared_rows: HashMap<TableId, HashSet<RecordId>>,
    exclusive_rows: HashMap<TableId, HashSet<RecordId>>,
}

/// A transaction as the lock manager and executors see it: identifier,
/// isolation level, lifecycle state, and the bookkeeping sets of held
/// locks, one per table mode plus shared/exclusive row sets.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    locks: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            locks: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub(crate) fn record_table_lock(&self, mode: LockMode, oid: TableId) {
        let mut locks = self.locks.lock();
        match mode {
            LockMode::Shared => locks.shared_tables.insert(oid),
            LockMode::Exclusive => locks.exclusive_tables.insert(oid),
            LockMode::IntentionShared => locks.intention_shared_tables.insert(oid),
            LockMode::IntentionExclusive => locks.intention_exclusive_tables.insert(oid),
            LockMode::SharedIntentionExclusive => {
                locks.shared_intention_exclusive_tables.insert(oid)
            }
        };
    }

    pub(crate) fn remove_table_lock(&self, mode: LockMode, oid: TableId) {
        let mut locks = self.locks.lock();
        match mode {
            LockMode::Shared => locks.shared_tables.remove(&oid),
            LockMode::Exclusive => locks.exclusive_tables.remove(&oid),
            LockMode::IntentionShared => locks.intention_shared_tables.remove(&oid),
            LockMode::IntentionExclusive => locks.intention_exclusive_tables.remove(&oid),
            LockMode::SharedIntentionExclusive => {
                locks.shared_intention_exclusive_tables.remove(&oid)
            }
        };
    }

    pub(crate) fn record_row_lock(&self, mode: LockMode, oid: TableId, rid: RecordId) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => unreachable!("intention locks are rejected on rows"),
        };
        rows.entry(oid).or_default().insert(rid);
    }

    pub(crate) fn remove_row_lock(&self, mode: LockMode, oid: TableId, rid: RecordId) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => unreachable!("intention locks are rejected on rows"),
        };
        if let Some(set) = rows.get_mut(&oid) {
            set.remove(&rid);
            if set.is_empty() {
                rows.remove(&oid);
            }
        }
    }

    pub(crate) fn clear_lock_sets(&self) {
        *self.locks.lock() = LockSets::default();
    }

    pub fn is_table_shared_locked(&self, oid: TableId) -> bool {
        self.locks.lock().shared_tables.contains(&oid)
    }

    pub fn is_table_exclusive_locked(&self, oid: TableId) -> bool {
        self.locks.lock().exclusive_tables.contains(&oid)
    }

    pub fn is_table_intention_shared_locked(&self, oid: TableId) -> bool {
        self.locks.lock().intention_shared_tables.contains(&oid)
    }

    pub fn is_table_intention_exclusive_locked(&self, oid: TableId) -> bool {
        self.locks.lock().intention_exclusive_tables.contains(&oid)
    }

    pub fn is_table_shared_intention_exclusive_locked(&self, oid: TableId) -> bool {
        self.locks
            .lock()
            .shared_intention_exclusive_tables
            .contains(&oid)
    }

    pub fn is_row_shared_locked(&self, oid: TableId, rid: RecordId) -> bool {
        self.locks
            .lock()
            .shared_rows
            .get(&oid)
            .is_some_and(|set| set.contains(&rid))
    }

    pub fn is_row_exclusive_locked(&self, oid: TableId, rid: RecordId) -> bool {
        self.locks
            .lock()
            .exclusive_rows
            .get(&oid)
            .is_some_and(|set| set.contains(&rid))
    }

    /// Whether this transaction still holds any row lock under the table.
    pub fn holds_row_locks_on(&self, oid: TableId) -> bool {
        let locks = self.locks.lock();
        locks.shared_rows.get(&oid).is_some_and(|s| !s.is_empty())
            || locks.exclusive_rows.get(&oid).is_some_and(|s| !s.is_empty())
    }

    /// Shared row locks held under the table, for end-of-scan release.
    pub fn shared_row_locks_on(&self, oid: TableId) -> Vec<RecordId> {
        self.locks
            .lock()
            .shared_rows
            .get(&oid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Tables on which any lock is held, with the held modes.
    pub fn held_table_locks(&self) -> Vec<(TableId, LockMode)> {
        let locks = self.locks.lock();
        let mut held = Vec::new();
        held.extend(locks.shared_tables.iter().map(|&o| (o, LockMode::Shared)));
        held.extend(
            locks
                .exclusive_tables
                .iter()
                .map(|&o| (o, LockMode::Exclusive)),
        );
        held.extend(
            locks
                .intention_shared_tables
                .iter()
                .map(|&o| (o, LockMode::IntentionShared)),
        );
        held.extend(
            locks
                .intention_exclusive_tables
                .iter()
                .map(|&o| (o, LockMode::IntentionExclusive)),
        );
        held.extend(
            locks
                .shared_intention_exclusive_tables
                .iter()
                .map(|&o| (o, LockMode::SharedIntentionExclusive)),
        );
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PageId, SlotId};

    #[test]
    fn test_state_transitions() {
        let txn = Transaction::new(TxnId::new(1), IsolationLevel::RepeatableRead);
        assert_eq!(txn.state(), TransactionState::Growing);
        txn.set_state(TransactionState::Shrinking);
        assert_eq!(txn.state(), TransactionState::Shrinking);
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(TxnId::new(1), IsolationLevel::RepeatableRead);
        let rid = RecordId::new(PageId::new(1), SlotId::new(0));

        txn.record_table_lock(LockMode::IntentionExclusive, 7);
        assert!(txn.is_table_intention_exclusive_locked(7));

        txn.record_row_lock(LockMode::Exclusive, 7, rid);
        assert!(txn.is_row_exclusive_locked(7, rid));
        assert!(txn.holds_row_locks_on(7));

        txn.remove_row_lock(LockMode::Exclusive, 7, rid);
        assert!(!txn.holds_row_locks_on(7));

        txn.remove_table_lock(LockMode::IntentionExclusive, 7);
        assert!(!txn.is_table_intention_exclusive_locked(7));
    }
}
