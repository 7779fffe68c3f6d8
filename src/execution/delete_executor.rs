use std::sync::Arc;

use crate::common::{RecordId, Result};
use crate::concurrency::LockMode;
use crate::tuple::{Tuple, Value};

use super::{null_rid, Executor, ExecutorContext};

/// Deletes every row the child yields. IX on the table at init; each row
/// is locked X before the heap and the indexes are touched. `next`
/// reports the row count exactly once.
pub struct DeleteExecutor {
    ctx: Arc<ExecutorContext>,
    table_name: String,
    child: Box<dyn Executor>,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_name: impl Into<String>,
        child: Box<dyn Executor>,
    ) -> Self {
        Self {
            ctx,
            table_name: table_name.into(),
            child,
            done: false,
        }
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        let table = self.ctx.catalog.table(&self.table_name)?;
        let txn = &self.ctx.txn;
        let covered = txn.is_table_intention_exclusive_locked(table.oid)
            || txn.is_table_shared_intention_exclusive_locked(table.oid)
            || txn.is_table_exclusive_locked(table.oid);
        if covered {
            return Ok(());
        }
        self.ctx
            .lock_manager
            .lock_table(txn, LockMode::IntentionExclusive, table.oid)
    }

    fn next(&mut self) -> Result<Option<(Tuple, RecordId)>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let table = self.ctx.catalog.table(&self.table_name)?;
        let indexes = self.ctx.catalog.table_indexes(&self.table_name);

        let mut count = 0i32;
        while let Some((tuple, rid)) = self.child.next()? {
            self.ctx
                .lock_manager
                .lock_row(&self.ctx.txn, LockMode::Exclusive, table.oid, rid)?;

            table.heap.delete_tuple(rid)?;
            for index in &indexes {
                let key = index.key_of(&tuple)?;
                index.index.remove(&key)?;
            }
            count += 1;
        }

        Ok(Some((Tuple::new(vec![Value::Integer(count)]), null_rid())))
    }
}
