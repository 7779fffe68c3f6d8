use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::catalog::Catalog;
use crate::concurrency::{LockManager, Transaction, TransactionManager};

/// Everything an executor needs: storage, metadata, locks, and the
/// transaction it runs under.
pub struct ExecutorContext {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub txn_manager: Arc<TransactionManager>,
    pub txn: Arc<Transaction>,
}

impl ExecutorContext {
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        catalog: Arc<Catalog>,
        lock_manager: Arc<LockManager>,
        txn_manager: Arc<TransactionManager>,
        txn: Arc<Transaction>,
    ) -> Self {
        Self {
            bpm,
            catalog,
            lock_manager,
            txn_manager,
            txn,
        }
    }
}
