use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::common::TxnId;

use super::lock_manager::LockManager;
use super::transaction::{IsolationLevel, Transaction, TransactionState};

/// Hands out transaction ids and drives commit/abort, releasing all held
/// locks through the lock manager on completion.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
        }
    }

    /// Starts a transaction at the given isolation level.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        Arc::new(Transaction::new(id, isolation_level))
    }

    /// Commits: transitions to COMMITTED and releases every lock.
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.lock_manager.release_all(txn);
        debug!(txn = %txn.id(), "committed");
    }

    /// Aborts: transitions to ABORTED and releases every lock. Waiters
    /// blocked in the lock manager observe the state on wake-up and
    /// remove themselves.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all(txn);
        debug!(txn = %txn.id(), "aborted");
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }
}
