use std::sync::Arc;

use crate::catalog::TableInfo;
use crate::common::{RecordId, Result};
use crate::concurrency::{IsolationLevel, LockMode};
use crate::storage::table::TableIterator;
use crate::tuple::Tuple;

use super::{Executor, ExecutorContext, Predicate};

/// Full-table scan with an optional filter predicate.
///
/// Locking discipline: IS on the table at init (except READ_UNCOMMITTED),
/// S on every yielded row; under READ_COMMITTED all S row locks and the
/// table lock are released at end-of-scan.
pub struct SeqScanExecutor {
    ctx: Arc<ExecutorContext>,
    table_name: String,
    predicate: Option<Predicate>,
    table: Option<Arc<TableInfo>>,
    iter: Option<TableIterator>,
}

impl SeqScanExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_name: impl Into<String>,
        predicate: Option<Predicate>,
    ) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            predicate,
            table: None,
            iter: None,
        }
    }

    /// End-of-scan release under READ_COMMITTED: all S row locks, then
    /// the table's IS lock. A table lock upgraded to IX by an enclosing
    /// write operator stays, as does nothing on a repeated call.
    fn release_read_locks(&self, table: &TableInfo) -> Result<()> {
        for rid in self.ctx.txn.shared_row_locks_on(table.oid) {
            self.ctx
                .lock_manager
                .unlock_row(&self.ctx.txn, table.oid, rid)?;
        }
        if self.ctx.txn.is_table_intention_shared_locked(table.oid) {
            self.ctx
                .lock_manager
                .unlock_table(&self.ctx.txn, table.oid)?;
        }
        Ok(())
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<()> {
        let table = self.ctx.catalog.table(&self.table_name)?;
        let txn = &self.ctx.txn;
        // Any held table lock already covers reading; requesting IS on
        // top of a stronger mode would be an illegal downgrade.
        let covered = txn.is_table_intention_shared_locked(table.oid)
            || txn.is_table_shared_locked(table.oid)
            || txn.is_table_intention_exclusive_locked(table.oid)
            || txn.is_table_shared_intention_exclusive_locked(table.oid)
            || txn.is_table_exclusive_locked(table.oid);
        if txn.isolation_level() != IsolationLevel::ReadUncommitted && !covered {
            self.ctx
                .lock_manager
                .lock_table(txn, LockMode::IntentionShared, table.oid)?;
        }
        self.iter = Some(table.heap.iter());
        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, RecordId)>> {
        let table = Arc::clone(self.table.as_ref().expect("init must run first"));

        loop {
            let item = self.iter.as_mut().expect("init must run first").next()?;
            let Some((rid, bytes)) = item else {
                if self.ctx.txn.isolation_level() == IsolationLevel::ReadCommitted {
                    self.release_read_locks(&table)?;
                }
                return Ok(None);
            };

            let tuple = Tuple::from_bytes(&table.schema, &bytes)?;
            if let Some(predicate) = &self.predicate {
                if !predicate(&tuple) {
                    continue;
                }
            }

            let txn = &self.ctx.txn;
            if txn.isolation_level() != IsolationLevel::ReadUncommitted
                && !txn.is_row_shared_locked(table.oid, rid)
                && !txn.is_row_exclusive_locked(table.oid, rid)
            {
                self.ctx
                    .lock_manager
                    .lock_row(txn, LockMode::Shared, table.oid, rid)?;
            }
            return Ok(Some((tuple, rid)));
        }
    }
}
